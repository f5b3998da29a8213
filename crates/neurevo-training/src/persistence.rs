//! On-disk layout of an experiment.
//!
//! ```text
//! <experiment>/
//!   _meta.json           experiment meta (ExperimentMeta)
//!   _log.txt             human-readable experiment log
//!   best.brn             best brain seen so far
//!   gen000/
//!     nn-000-000.brn     one artifact per brain
//!     nn-000-best.brn    copy of the generation's best brain
//!     _summary.txt       fitness statistics (evaluated generations only)
//!     _meta.txt          generation meta, written last
//! ```
//!
//! A weight-matrix brain artifact is JSON: `{"fitness": 12.5, "network": [[[..]]]}`.
//! A parameterless brain artifact is an empty file; its fitness is recovered
//! from the generation summary.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use neurevo_genome::{Genome, GenomeError, GenomeKind, WeightMatrixGenome};
use serde::{Deserialize, Serialize};

use crate::{
    brain::Brain,
    config::TrainingConfig,
    generation::{FitnessSummary, Generation},
};

pub const EXPERIMENT_META_FILE: &str = "_meta.json";
pub const LOG_FILE: &str = "_log.txt";
pub const BEST_BRAIN_FILE: &str = "best.brn";
pub const GENERATION_META_FILE: &str = "_meta.txt";
pub const SUMMARY_FILE: &str = "_summary.txt";

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum PersistenceError {
    #[display("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[display("{} not found", path.display())]
    NotFound { path: PathBuf },
    #[display("I/O error on {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[display("invalid JSON in {}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[display("invalid genome in {}", path.display())]
    Genome { path: PathBuf, source: GenomeError },
    #[display("malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_owned(),
            }
        } else {
            Self::Io {
                path: path.to_owned(),
                source,
            }
        }
    }

    fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

#[must_use]
pub fn generation_dir_name(index: usize) -> String {
    format!("gen{index:03}")
}

#[must_use]
pub fn brain_file_name(kind: GenomeKind, generation: usize, id: usize) -> String {
    format!("{}-{generation:03}-{id:03}.brn", file_prefix(kind))
}

#[must_use]
pub fn best_brain_file_name(kind: GenomeKind, generation: usize) -> String {
    format!("{}-{generation:03}-best.brn", file_prefix(kind))
}

fn file_prefix(kind: GenomeKind) -> String {
    kind.algorithm_name().to_lowercase()
}

/// Writes `bytes` to a temporary sibling, syncs it, and renames it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_owned();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp).map_err(|e| PersistenceError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| PersistenceError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    fs::write(path, bytes).map_err(|e| PersistenceError::io(path, e))
}

fn read_file(path: &Path) -> Result<Vec<u8>, PersistenceError> {
    fs::read(path).map_err(|e| PersistenceError::io(path, e))
}

fn read_text(path: &Path) -> Result<String, PersistenceError> {
    fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))
}

#[derive(Serialize)]
struct BrainRecordRef<'a> {
    fitness: Option<f32>,
    network: &'a WeightMatrixGenome,
}

#[derive(Deserialize)]
struct BrainRecord {
    fitness: Option<f32>,
    network: WeightMatrixGenome,
}

/// Encodes a brain artifact.
pub fn encode_brain(brain: &Brain) -> Result<Vec<u8>, serde_json::Error> {
    match brain.genome() {
        Genome::Parameterless => Ok(vec![]),
        Genome::WeightMatrix(network) => serde_json::to_vec(&BrainRecordRef {
            fitness: brain.fitness(),
            network,
        }),
    }
}

/// Reads a brain artifact. Parameterless artifacts carry no fitness.
pub fn read_brain(path: &Path, kind: GenomeKind) -> Result<(Genome, Option<f32>), PersistenceError> {
    let bytes = read_file(path)?;
    match kind {
        GenomeKind::Parameterless => {
            let genome = Genome::from_bytes(kind, &bytes).map_err(|source| {
                PersistenceError::Genome {
                    path: path.to_owned(),
                    source,
                }
            })?;
            Ok((genome, None))
        }
        GenomeKind::WeightMatrix => {
            let record: BrainRecord =
                serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Json {
                    path: path.to_owned(),
                    source,
                })?;
            Ok((Genome::WeightMatrix(record.network), record.fitness))
        }
    }
}

fn write_brain(path: &Path, brain: &Brain) -> Result<(), PersistenceError> {
    let bytes = encode_brain(brain).map_err(|source| PersistenceError::Json {
        path: path.to_owned(),
        source,
    })?;
    write_file(path, &bytes)
}

impl Generation {
    /// Writes this generation into `dir`, which must not exist yet.
    ///
    /// The generation meta file is written last, so a directory without it
    /// is an interrupted save.
    pub fn save(&self, dir: &Path) -> Result<(), PersistenceError> {
        match fs::create_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PersistenceError::AlreadyExists {
                    path: dir.to_owned(),
                });
            }
            Err(e) => return Err(PersistenceError::io(dir, e)),
        }

        let kind = self.config().algorithm;
        for (id, brain) in self.brains().iter().enumerate() {
            write_brain(&dir.join(brain_file_name(kind, self.index(), id)), brain)?;
        }

        let mut meta = GenerationMeta {
            kind,
            index: self.index(),
            total: self.len(),
            evaluated: self.is_evaluated(),
            best: None,
        };
        if let (Ok(best_id), Ok(summary)) = (self.best_brain_id(), self.fitness_summary()) {
            let best = &self.brains()[best_id];
            write_brain(&dir.join(best_brain_file_name(kind, self.index())), best)?;
            write_file(
                &dir.join(SUMMARY_FILE),
                format_summary(kind, self.index(), &summary).as_bytes(),
            )?;
            meta.best = Some((best_id, summary.max));
        }
        write_file(&dir.join(GENERATION_META_FILE), meta.to_string().as_bytes())?;

        tracing::debug!(dir = %dir.display(), brains = self.len(), "saved generation");
        Ok(())
    }

    /// Reads a generation written by [`Generation::save`].
    pub fn load(dir: &Path, config: Arc<TrainingConfig>) -> Result<Self, PersistenceError> {
        let meta_path = dir.join(GENERATION_META_FILE);
        let meta = GenerationMeta::parse(&meta_path, &read_text(&meta_path)?)?;
        if meta.kind != config.algorithm {
            return Err(PersistenceError::malformed(
                &meta_path,
                format!(
                    "generation holds {} brains, configuration expects {}",
                    meta.kind, config.algorithm
                ),
            ));
        }

        let summary_fitnesses = if meta.evaluated && meta.kind == GenomeKind::Parameterless {
            let path = dir.join(SUMMARY_FILE);
            parse_summary_fitnesses(&path, &read_text(&path)?)?
        } else {
            HashMap::new()
        };

        let mut brains = Vec::with_capacity(meta.total);
        for id in 0..meta.total {
            let path = dir.join(brain_file_name(meta.kind, meta.index, id));
            let (genome, fitness) = read_brain(&path, meta.kind)?;
            let fitness = fitness.or_else(|| summary_fitnesses.get(&id).copied());
            let brain = match (meta.evaluated, fitness) {
                (true, Some(fitness)) => Brain::with_fitness(genome, fitness),
                (true, None) => {
                    return Err(PersistenceError::malformed(
                        &path,
                        "evaluated generation is missing a fitness",
                    ));
                }
                (false, _) => Brain::new(genome),
            };
            brains.push(brain);
        }

        Ok(Self::restore(meta.index, config, brains, meta.evaluated))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GenerationMeta {
    kind: GenomeKind,
    index: usize,
    total: usize,
    evaluated: bool,
    best: Option<(usize, f32)>,
}

impl std::fmt::Display for GenerationMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} Generation #{:03}",
            self.kind.algorithm_name(),
            self.index
        )?;
        writeln!(f, "Total Brains in this Generation: {}", self.total)?;
        writeln!(
            f,
            "Evaluated: {}",
            if self.evaluated { "YES" } else { "NO" }
        )?;
        match self.best {
            Some((id, fitness)) => {
                writeln!(f, "Best Brain: {id:03}")?;
                writeln!(f, "Best Fitness: {fitness:.2}")
            }
            None => {
                writeln!(f, "Best Brain: {NOT_AVAILABLE}")?;
                writeln!(f, "Best Fitness: {NOT_AVAILABLE}")
            }
        }
    }
}

impl GenerationMeta {
    fn parse(path: &Path, text: &str) -> Result<Self, PersistenceError> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| PersistenceError::malformed(path, "empty file"))?;
        let (algorithm, index) = header
            .split_once(" Generation #")
            .ok_or_else(|| PersistenceError::malformed(path, "missing generation header"))?;
        let kind = GenomeKind::from_algorithm_name(algorithm).ok_or_else(|| {
            PersistenceError::malformed(path, format!("unknown algorithm {algorithm:?}"))
        })?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| PersistenceError::malformed(path, "invalid generation index"))?;

        let fields = lines
            .filter_map(|line| line.split_once(": "))
            .collect::<HashMap<_, _>>();
        let field = |key: &str| {
            fields
                .get(key)
                .map(|value| value.trim())
                .ok_or_else(|| PersistenceError::malformed(path, format!("missing {key:?}")))
        };
        let total = field("Total Brains in this Generation")?
            .parse()
            .map_err(|_| PersistenceError::malformed(path, "invalid brain count"))?;
        let evaluated = match field("Evaluated")? {
            "YES" => true,
            "NO" => false,
            other => {
                return Err(PersistenceError::malformed(
                    path,
                    format!("invalid evaluated flag {other:?}"),
                ));
            }
        };

        Ok(Self {
            kind,
            index,
            total,
            evaluated,
            best: None,
        })
    }
}

fn format_summary(kind: GenomeKind, index: usize, summary: &FitnessSummary) -> String {
    use std::fmt::Write as _;

    let mut text = format!(
        "{} Generation #{index:03} Summary\n\
         Max Fitness: {:.2}\n\
         Min Fitness: {:.2}\n\
         Mean Fitness: {:.2}\n\
         Individual Fitnesses:\n",
        kind.algorithm_name(),
        summary.max,
        summary.min,
        summary.mean,
    );
    for (id, fitness) in summary.fitnesses.iter().enumerate() {
        let _ = writeln!(text, "{id:03}: {fitness}");
    }
    text
}

fn parse_summary_fitnesses(
    path: &Path,
    text: &str,
) -> Result<HashMap<usize, f32>, PersistenceError> {
    text.lines()
        .skip_while(|line| *line != "Individual Fitnesses:")
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| -> Result<(usize, f32), PersistenceError> {
            let (id, fitness) = line
                .split_once(": ")
                .ok_or_else(|| PersistenceError::malformed(path, format!("bad line {line:?}")))?;
            let id = id
                .trim()
                .parse()
                .map_err(|_| PersistenceError::malformed(path, format!("bad brain id {id:?}")))?;
            let fitness = fitness.trim().parse().map_err(|_| {
                PersistenceError::malformed(path, format!("bad fitness {fitness:?}"))
            })?;
            Ok((id, fitness))
        })
        .collect()
}

/// Durable progress record of an experiment (`_meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    #[serde(rename = "AI Algorithm", with = "algorithm_name")]
    pub algorithm: GenomeKind,
    #[serde(rename = "Best Fitness")]
    pub best_fitness: f32,
    /// `"Generation: NNN - ID: NNN"` of the best brain, or `"N/A"`.
    #[serde(rename = "Best Brain")]
    pub best_brain: String,
    /// Index of the next generation to build.
    #[serde(rename = "Generation Index")]
    pub generation_index: usize,
    /// Consecutive generations without progress.
    #[serde(rename = "Stagnation Index")]
    pub stagnation_index: usize,
}

impl ExperimentMeta {
    #[must_use]
    pub fn new(algorithm: GenomeKind) -> Self {
        Self {
            algorithm,
            best_fitness: 0.0,
            best_brain: NOT_AVAILABLE.to_owned(),
            generation_index: 0,
            stagnation_index: 0,
        }
    }

    #[must_use]
    pub fn best_brain_tag(generation: usize, id: usize) -> String {
        format!("Generation: {generation:03} - ID: {id:03}")
    }

    /// Index of the most recently completed generation, if any.
    #[must_use]
    pub fn last_generation(&self) -> Option<usize> {
        self.generation_index.checked_sub(1)
    }

    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let bytes = read_file(path)?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Json {
            path: path.to_owned(),
            source,
        })
    }

    pub fn store(&self, path: &Path) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| PersistenceError::Json {
            path: path.to_owned(),
            source,
        })?;
        write_atomically(path, &bytes)
    }
}

mod algorithm_name {
    use neurevo_genome::GenomeKind;
    use serde::{Deserialize as _, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S>(kind: &GenomeKind, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(kind.algorithm_name())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<GenomeKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        GenomeKind::from_algorithm_name(&name)
            .ok_or_else(|| D::Error::custom(format!("unknown AI algorithm {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestDir, evaluated_generation, small_config, valued_genome};

    fn brain_multiset(generation: &Generation) -> Vec<(Vec<u8>, Option<f32>)> {
        let mut set = generation
            .brains()
            .iter()
            .map(|b| (b.genome().to_bytes().unwrap(), b.fitness()))
            .collect::<Vec<_>>();
        set.sort_by(|a, b| a.0.cmp(&b.0));
        set
    }

    #[test]
    fn test_file_names() {
        assert_eq!(generation_dir_name(7), "gen007");
        assert_eq!(
            brain_file_name(GenomeKind::WeightMatrix, 3, 12),
            "nn-003-012.brn"
        );
        assert_eq!(
            best_brain_file_name(GenomeKind::Parameterless, 0),
            "simple-000-best.brn"
        );
    }

    #[test]
    fn test_save_load_evaluated_network_generation() {
        let dir = TestDir::new("save-nn");
        let generation = evaluated_generation(small_config(5, 0.4), &[0.5, 3.25, -1.0, 3.25, 2.0]);
        let path = dir.join("gen000");
        generation.save(&path).unwrap();
        assert!(path.join("nn-000-best.brn").is_file());
        assert!(path.join(SUMMARY_FILE).is_file());

        let loaded = Generation::load(&path, Arc::clone(generation.config())).unwrap();
        assert_eq!(loaded.index(), 0);
        assert!(loaded.is_evaluated());
        assert_eq!(loaded.best_brain_id().unwrap(), 1);
        assert_eq!(brain_multiset(&loaded), brain_multiset(&generation));
    }

    #[test]
    fn test_save_load_unevaluated_generation() {
        let dir = TestDir::new("save-new");
        let config = Arc::new(small_config(3, 1.0));
        let brains = [0.1, 0.2, 0.3]
            .into_iter()
            .map(|v| Brain::new(valued_genome(v)))
            .collect();
        let generation = Generation::from_brains(4, Arc::clone(&config), brains);
        let path = dir.join("gen004");
        generation.save(&path).unwrap();
        assert!(!path.join(SUMMARY_FILE).exists());

        let loaded = Generation::load(&path, config).unwrap();
        assert_eq!(loaded.index(), 4);
        assert!(!loaded.is_evaluated());
        assert_eq!(brain_multiset(&loaded), brain_multiset(&generation));
    }

    #[test]
    fn test_save_load_parameterless_restores_fitness_from_summary() {
        let dir = TestDir::new("save-simple");
        let config = Arc::new(TrainingConfig {
            algorithm: GenomeKind::Parameterless,
            ..small_config(3, 1.0)
        });
        let brains = [1.5, 0.1, 7.123_456]
            .into_iter()
            .map(|f| Brain::with_fitness(Genome::Parameterless, f))
            .collect();
        let generation = Generation::restore(2, Arc::clone(&config), brains, true);
        let path = dir.join("gen002");
        generation.save(&path).unwrap();
        assert_eq!(fs::read(path.join("simple-002-000.brn")).unwrap(), b"");

        let loaded = Generation::load(&path, config).unwrap();
        let fitnesses = loaded
            .brains()
            .iter()
            .map(|b| b.fitness().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(fitnesses, vec![1.5, 0.1, 7.123_456]);
        assert_eq!(loaded.best_brain_id().unwrap(), 2);
    }

    #[test]
    fn test_save_refuses_existing_directory() {
        let dir = TestDir::new("save-exists");
        let generation = evaluated_generation(small_config(2, 1.0), &[1.0, 2.0]);
        assert!(matches!(
            generation.save(dir.path()),
            Err(PersistenceError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_load_without_meta_is_not_found() {
        let dir = TestDir::new("load-missing");
        let result = Generation::load(&dir.join("gen000"), Arc::new(small_config(2, 1.0)));
        assert!(matches!(result, Err(PersistenceError::NotFound { .. })));

        // An interrupted save leaves brain files but no meta.
        fs::write(dir.path().join("nn-000-000.brn"), b"{}").unwrap();
        let result = Generation::load(dir.path(), Arc::new(small_config(2, 1.0)));
        assert!(matches!(result, Err(PersistenceError::NotFound { .. })));
    }

    #[test]
    fn test_generation_meta_format() {
        let meta = GenerationMeta {
            kind: GenomeKind::WeightMatrix,
            index: 3,
            total: 10,
            evaluated: true,
            best: Some((4, 12.345)),
        };
        let text = meta.to_string();
        assert_eq!(
            text,
            "NN Generation #003\n\
             Total Brains in this Generation: 10\n\
             Evaluated: YES\n\
             Best Brain: 004\n\
             Best Fitness: 12.35\n"
        );
        let parsed = GenerationMeta::parse(Path::new("_meta.txt"), &text).unwrap();
        assert_eq!(parsed, GenerationMeta { best: None, ..meta });
    }

    #[test]
    fn test_experiment_meta_json_keys() {
        let dir = TestDir::new("exp-meta");
        let path = dir.join(EXPERIMENT_META_FILE);
        let mut meta = ExperimentMeta::new(GenomeKind::WeightMatrix);
        meta.best_brain = ExperimentMeta::best_brain_tag(2, 7);
        meta.generation_index = 3;
        meta.store(&path).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["AI Algorithm"], "NN");
        assert_eq!(json["Best Brain"], "Generation: 002 - ID: 007");
        assert_eq!(json["Generation Index"], 3);
        assert_eq!(json["Stagnation Index"], 0);
        assert!(!dir.join("_meta.json.tmp").exists());

        assert_eq!(ExperimentMeta::load(&path).unwrap(), meta);
        assert_eq!(meta.last_generation(), Some(2));
        assert_eq!(ExperimentMeta::new(GenomeKind::Parameterless).last_generation(), None);
    }
}
