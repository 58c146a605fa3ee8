//! Fixed-size ring of the best validation checkpoints.

use super::state::{Checkpointable, RingRecord, SlotRecord};
use crate::{BanditError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Whether `score` improves on `other` under the given direction.
pub fn is_better(score: f64, other: f64, minimize: bool) -> bool {
    if minimize {
        score < other
    } else {
        score > other
    }
}

/// Keeps the N best-scoring parameter snapshots.
///
/// Slot files are `<prefix>` when N == 1 and `<prefix>.<i>` otherwise. The
/// stable best link is a symlink to the basename of the best slot, so it
/// must live in the same directory as the slots.
///
/// # Example
///
/// ```ignore
/// let mut ring = CheckpointRing::new("/tmp/vars.data", "/tmp/vars.data.best", 3, false)?;
/// ring.initialize(&engine)?;
///
/// // At every validation:
/// if let Some(slot) = ring.offer(&engine, score)? {
///     tracing::info!(slot, "Saved");
/// }
///
/// // Before testing:
/// ring.restore_best(&mut engine)?;
/// ```
#[derive(Debug)]
pub struct CheckpointRing {
    files: Vec<PathBuf>,
    scores: Vec<Option<f64>>,
    best_link: PathBuf,
    record_path: PathBuf,
    minimize: bool,
    best_index: Option<usize>,
}

impl CheckpointRing {
    /// Create a ring of `size` slots. Fails when `size` is zero.
    pub fn new(
        vars_prefix: impl AsRef<Path>,
        best_link: impl Into<PathBuf>,
        size: usize,
        minimize: bool,
    ) -> Result<Self> {
        if size < 1 {
            return Err(BanditError::Config(
                "save_n_best must be greater than zero".to_string(),
            ));
        }
        let prefix = vars_prefix.as_ref();
        let files = if size == 1 {
            vec![prefix.to_path_buf()]
        } else {
            (0..size)
                .map(|i| PathBuf::from(format!("{}.{}", prefix.display(), i)))
                .collect()
        };

        Ok(Self {
            files,
            scores: vec![None; size],
            best_link: best_link.into(),
            record_path: PathBuf::from(format!("{}.scores.json", prefix.display())),
            minimize,
            best_index: None,
        })
    }

    /// Save the initial parameters into the first slot and point the best link at it.
    ///
    /// The initial snapshot carries no score, so any validated model replaces it.
    pub fn initialize<M: Checkpointable + ?Sized>(&mut self, model: &M) -> Result<()> {
        if let Some(parent) = self.files[0].parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.files[0], model.save_state()?)?;
        point_link(&self.best_link, &self.files[0])?;
        self.write_record()?;
        tracing::debug!(path = %self.files[0].display(), "Saved initial variables");
        Ok(())
    }

    /// Offer a validation score for the current parameters.
    ///
    /// If it beats the worst retained score, the parameters overwrite that
    /// slot and the slot index is returned. The best link moves when the
    /// new score is at least as good as every retained score.
    pub fn offer<M: Checkpointable + ?Sized>(
        &mut self,
        model: &M,
        score: f64,
    ) -> Result<Option<usize>> {
        let worst = self.worst_index();
        let improves = match self.scores[worst] {
            None => !score.is_nan(),
            Some(worst_score) => is_better(score, worst_score, self.minimize),
        };
        if !improves {
            return Ok(None);
        }

        let path = &self.files[worst];
        fs::write(path, model.save_state()?)?;
        self.scores[worst] = Some(score);
        tracing::info!(path = %path.display(), "Variable file saved");

        let is_best = self
            .scores
            .iter()
            .flatten()
            .all(|&other| !is_better(other, score, self.minimize));
        if is_best {
            point_link(&self.best_link, path)?;
            self.best_index = Some(worst);
        }
        self.write_record()?;

        tracing::info!(scores = ?self.retained_scores(), "Best scores saved so far");
        Ok(Some(worst))
    }

    /// Load the parameters the best link points at.
    ///
    /// Returns false when no best link exists.
    pub fn restore_best<M: Checkpointable + ?Sized>(&self, model: &mut M) -> Result<bool> {
        if !self.has_best_link() {
            return Ok(false);
        }
        let data = fs::read(&self.best_link)?;
        model.load_state(&data)?;
        tracing::info!(path = %self.best_link.display(), "Restored best variables");
        Ok(true)
    }

    pub fn has_best_link(&self) -> bool {
        fs::symlink_metadata(&self.best_link).is_ok()
    }

    pub fn best_link(&self) -> &Path {
        &self.best_link
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Slot holding the best validated snapshot, if any.
    pub fn best_index(&self) -> Option<usize> {
        self.best_index
    }

    /// Scores of slots holding validated snapshots, in slot order.
    pub fn retained_scores(&self) -> Vec<f64> {
        self.scores.iter().flatten().copied().collect()
    }

    pub fn record(&self) -> RingRecord {
        RingRecord {
            minimize: self.minimize,
            best_link: self.best_link.clone(),
            best_index: self.best_index,
            slots: self
                .files
                .iter()
                .zip(&self.scores)
                .map(|(path, score)| SlotRecord {
                    path: path.clone(),
                    score: *score,
                })
                .collect(),
            version: crate::VERSION.to_string(),
        }
    }

    /// Read the metadata written next to a ring with the given prefix.
    pub fn load_record(vars_prefix: impl AsRef<Path>) -> Result<RingRecord> {
        let path = format!("{}.scores.json", vars_prefix.as_ref().display());
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn write_record(&self) -> Result<()> {
        fs::write(&self.record_path, serde_json::to_vec_pretty(&self.record())?)?;
        Ok(())
    }

    /// First empty slot, else the first slot holding the worst score.
    fn worst_index(&self) -> usize {
        if let Some(empty) = self.scores.iter().position(Option::is_none) {
            return empty;
        }
        let mut worst = 0;
        for (i, score) in self.scores.iter().enumerate().skip(1) {
            if let (Some(score), Some(current)) = (score, self.scores[worst]) {
                if is_better(current, *score, self.minimize) {
                    worst = i;
                }
            }
        }
        worst
    }
}

/// Point `link` at the basename of `target`, replacing any existing link in one rename.
fn point_link(link: &Path, target: &Path) -> Result<()> {
    let target_name = target.file_name().ok_or_else(|| {
        BanditError::Config(format!("invalid variables path: {}", target.display()))
    })?;
    let link_name = link
        .file_name()
        .ok_or_else(|| BanditError::Config(format!("invalid link path: {}", link.display())))?;
    let staging = link.with_file_name(format!(".{}.tmp", link_name.to_string_lossy()));
    let _ = fs::remove_file(&staging);

    #[cfg(unix)]
    std::os::unix::fs::symlink(target_name, &staging)?;
    #[cfg(not(unix))]
    {
        let _ = target_name;
        fs::copy(target, &staging)?;
    }

    fs::rename(&staging, link)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    /// Model whose state is just the score it was saved with.
    struct MockModel {
        data: Vec<u8>,
    }

    impl Checkpointable for MockModel {
        fn save_state(&self) -> Result<Vec<u8>> {
            Ok(self.data.clone())
        }

        fn load_state(&mut self, data: &[u8]) -> Result<()> {
            self.data = data.to_vec();
            Ok(())
        }
    }

    fn model_for(score: f64) -> MockModel {
        MockModel {
            data: score.to_string().into_bytes(),
        }
    }

    fn ring_in(dir: &Path, size: usize, minimize: bool) -> CheckpointRing {
        let mut ring =
            CheckpointRing::new(dir.join("vars"), dir.join("vars.best"), size, minimize).unwrap();
        ring.initialize(&model_for(f64::NAN)).unwrap();
        ring
    }

    fn best_link_content(ring: &CheckpointRing) -> String {
        String::from_utf8(fs::read(ring.best_link()).unwrap()).unwrap()
    }

    #[test]
    fn test_is_better() {
        assert!(is_better(0.1, 0.2, true));
        assert!(!is_better(0.1, 0.2, false));
        assert!(!is_better(0.2, 0.2, true));
        assert!(!is_better(0.2, 0.2, false));
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempdir().unwrap();
        let result = CheckpointRing::new(dir.path().join("v"), dir.path().join("v.best"), 0, false);
        assert!(matches!(result, Err(BanditError::Config(_))));
    }

    #[test]
    fn test_single_slot_uses_prefix() {
        let dir = tempdir().unwrap();
        let ring = ring_in(dir.path(), 1, false);
        assert_eq!(ring.files(), &[dir.path().join("vars")]);
        assert!(dir.path().join("vars").exists());
        assert!(ring.has_best_link());
    }

    #[test]
    fn test_keeps_three_best_of_five() {
        let dir = tempdir().unwrap();
        let mut ring = ring_in(dir.path(), 3, false);

        for score in [0.5, 0.7, 0.6, 0.9, 0.4] {
            ring.offer(&model_for(score), score).unwrap();
        }

        let mut retained = ring.retained_scores();
        retained.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(retained, vec![0.6, 0.7, 0.9]);
        assert_eq!(best_link_content(&ring), "0.9");
        assert_eq!(ring.best_index(), Some(0));

        #[cfg(unix)]
        assert_eq!(
            fs::read_link(ring.best_link()).unwrap(),
            PathBuf::from("vars.0")
        );
    }

    #[test]
    fn test_minimize_keeps_lowest() {
        let dir = tempdir().unwrap();
        let mut ring = ring_in(dir.path(), 2, true);

        assert_eq!(ring.offer(&model_for(3.0), 3.0).unwrap(), Some(0));
        assert_eq!(ring.offer(&model_for(1.0), 1.0).unwrap(), Some(1));
        assert_eq!(ring.offer(&model_for(2.0), 2.0).unwrap(), Some(0));
        assert_eq!(ring.offer(&model_for(5.0), 5.0).unwrap(), None);

        assert_eq!(ring.retained_scores(), vec![2.0, 1.0]);
        assert_eq!(best_link_content(&ring), "1");
    }

    #[test]
    fn test_restore_best() {
        let dir = tempdir().unwrap();
        let mut ring = ring_in(dir.path(), 2, false);
        ring.offer(&model_for(0.3), 0.3).unwrap();
        ring.offer(&model_for(0.8), 0.8).unwrap();
        ring.offer(&model_for(0.5), 0.5).unwrap();

        let mut model = MockModel { data: vec![] };
        assert!(ring.restore_best(&mut model).unwrap());
        assert_eq!(model.data, b"0.8".to_vec());
    }

    #[test]
    fn test_record_written() {
        let dir = tempdir().unwrap();
        let mut ring = ring_in(dir.path(), 2, false);
        ring.offer(&model_for(0.4), 0.4).unwrap();

        let record = CheckpointRing::load_record(dir.path().join("vars")).unwrap();
        assert_eq!(record.retained_scores(), vec![0.4]);
        assert_eq!(record.best_index, Some(0));
        assert_eq!(record.slots.len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_retains_n_best(
            scores in proptest::collection::vec(0u32..1000, 1..12),
            size in 1usize..5,
            minimize in any::<bool>(),
        ) {
            let dir = tempdir().unwrap();
            let mut ring = ring_in(dir.path(), size, minimize);
            let scores: Vec<f64> = scores.into_iter().map(|s| s as f64 / 10.0).collect();
            for &score in &scores {
                ring.offer(&model_for(score), score).unwrap();
            }

            let mut expected = scores.clone();
            expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
            if !minimize {
                expected.reverse();
            }
            expected.truncate(size);

            let mut retained = ring.retained_scores();
            retained.sort_by(|a, b| a.partial_cmp(b).unwrap());
            if !minimize {
                retained.reverse();
            }
            prop_assert_eq!(&retained, &expected);
            prop_assert_eq!(best_link_content(&ring), expected[0].to_string());
        }
    }
}
