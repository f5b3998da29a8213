use std::path::PathBuf;

use super::ConfigArg;
use crate::util;

#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct ShowConfigArg {
    #[clap(flatten)]
    pub(crate) config: ConfigArg,
    /// Output file path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &ShowConfigArg) -> anyhow::Result<()> {
    let ShowConfigArg { config, output } = arg;
    let config = config.load()?;
    util::write_json(&*config, output.as_deref())
}
