//! Hysteresis-gated alert trigger
//!
//! A ladder of loss thresholds `[base, 50, 75, 100]`. The trigger fires on
//! every upward level crossing but only fires downward when loss falls below
//! the threshold one full level beneath the current one, so loss oscillating
//! around a single boundary cannot flap alerts. The current ladder index is
//! persisted so the gate survives restarts; an unreadable state loads as 0,
//! the normal level.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Persisted ladder position. Implementations must treat a failed read as
/// level 0 — that is the fail-safe state, not an error.
pub trait LevelStore: Send + Sync {
    fn load(&self) -> usize;
    fn store(&self, level: usize);
}

/// Plain-integer-in-a-file level store with write-then-rename semantics so a
/// crash mid-write cannot leave a torn file behind.
pub struct FileLevelStore {
    path: PathBuf,
}

impl FileLevelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LevelStore for FileLevelStore {
    fn load(&self) -> usize {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn store(&self, level: usize) {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let outcome =
            fs::write(&tmp, level.to_string()).and_then(|_| fs::rename(&tmp, &self.path));
        if let Err(e) = outcome {
            warn!(path = %self.path.display(), error = %e, "failed to persist alert level");
        }
    }
}

/// See module docs. Driven by exactly one report loop per instance, so no
/// internal locking.
pub struct AlertTrigger {
    name: String,
    pub last_loss: f64,
    /// Loss as a percentage, set by `update`.
    pub current_loss: f64,
    levels: Vec<f64>,
    index: usize,
    pub ascending: bool,
    store: Box<dyn LevelStore>,
}

impl AlertTrigger {
    /// `base_threshold` is the first (configurable) ladder entry, in percent.
    /// The remaining rungs are fixed at 50/75/100.
    pub fn new(name: &str, base_threshold: f64, store: Box<dyn LevelStore>) -> Self {
        let levels = vec![base_threshold, 50.0, 75.0, 100.0];
        let index = store.load().min(levels.len() - 1);
        Self {
            name: name.to_string(),
            last_loss: 0.0,
            current_loss: 0.0,
            levels,
            index,
            ascending: false,
            store,
        }
    }

    /// Record the latest loss observation (a 0..1 fraction).
    pub fn update(&mut self, loss_fraction: f64) {
        self.last_loss = self.current_loss;
        self.current_loss = loss_fraction * 100.0;
    }

    /// Threshold at the current ladder position, for alert rendering.
    pub fn next_threshold(&self) -> f64 {
        self.levels[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Smallest ladder index whose threshold is at or above `loss`; clamps to
    /// the last index above the ladder and to 0 below the base threshold.
    fn upper_level(&self, loss: f64) -> usize {
        if loss >= *self.levels.last().expect("ladder is never empty") {
            return self.levels.len() - 1;
        }
        self.levels.iter().position(|&t| loss <= t).unwrap_or(0)
    }

    /// Evaluate the three-way hysteresis rule against the loss recorded by
    /// the last `update`, persisting the index on every change.
    pub fn should_send(&mut self) -> bool {
        // A base threshold of 0 disables gating entirely.
        if self.levels[0] == 0.0 {
            return true;
        }
        if self.current_loss < self.levels[0] {
            self.index = 0;
            self.store.store(0);
            debug!(trigger = %self.name, loss = self.current_loss, "loss below base threshold");
            return false;
        }
        if self.current_loss > self.levels[self.index] {
            self.index = self.upper_level(self.current_loss);
            self.ascending = true;
            self.store.store(self.index);
            debug!(trigger = %self.name, index = self.index, loss = self.current_loss, "threshold level up");
            return true;
        }
        if self.index > 0 && self.current_loss < self.levels[self.index - 1] {
            self.index = self.upper_level(self.current_loss);
            self.ascending = false;
            self.store.store(self.index);
            debug!(trigger = %self.name, index = self.index, loss = self.current_loss, "threshold level down");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// In-memory store for exercising the trigger rules.
    #[derive(Default)]
    struct MemStore {
        level: Arc<Mutex<usize>>,
    }

    impl LevelStore for MemStore {
        fn load(&self) -> usize {
            *self.level.lock()
        }

        fn store(&self, level: usize) {
            *self.level.lock() = level;
        }
    }

    fn trigger(base: f64) -> AlertTrigger {
        AlertTrigger::new("test", base, Box::<MemStore>::default())
    }

    fn evaluate(t: &mut AlertTrigger, loss_percent: f64) -> bool {
        t.update(loss_percent / 100.0);
        t.should_send()
    }

    #[test]
    fn below_base_resets_and_stays_quiet() {
        let mut t = trigger(5.0);
        assert!(evaluate(&mut t, 60.0));
        assert_eq!(t.index(), 2);
        assert!(!evaluate(&mut t, 2.0));
        assert_eq!(t.index(), 0);
    }

    #[test]
    fn fires_on_every_upward_crossing() {
        let mut t = trigger(5.0);
        assert!(evaluate(&mut t, 10.0)); // 0 -> 1
        assert_eq!(t.index(), 1);
        assert!(t.ascending);
        assert!(evaluate(&mut t, 60.0)); // 1 -> 2
        assert_eq!(t.index(), 2);
        assert!(evaluate(&mut t, 100.0)); // 2 -> 3
        assert_eq!(t.index(), 3);
    }

    #[test]
    fn downward_needs_two_level_gap() {
        let mut t = trigger(5.0);
        assert!(evaluate(&mut t, 80.0));
        assert_eq!(t.index(), 3);
        // One level's worth of recovery is inside the hysteresis band.
        assert!(!evaluate(&mut t, 80.0));
        assert_eq!(t.index(), 3);
        // Below levels[index-1] = 75 fires and drops.
        assert!(evaluate(&mut t, 60.0));
        assert_eq!(t.index(), 2);
        assert!(!t.ascending);
    }

    #[test]
    fn oscillation_inside_the_band_stays_quiet() {
        let mut t = trigger(5.0);
        assert!(evaluate(&mut t, 60.0));
        assert_eq!(t.index(), 2);
        // Anywhere in (50, 75] neither rule trips; re-crossing the entry
        // threshold upward does not re-fire.
        for loss in [55.0, 74.0, 51.0, 60.0, 75.0] {
            assert!(!evaluate(&mut t, loss));
            assert_eq!(t.index(), 2);
        }
    }

    #[test]
    fn upper_level_boundaries() {
        let t = trigger(5.0);
        assert_eq!(t.upper_level(5.0), 0);
        assert_eq!(t.upper_level(50.0), 1);
        assert_eq!(t.upper_level(75.0), 2);
        assert_eq!(t.upper_level(100.0), 3);
        assert_eq!(t.upper_level(250.0), 3);
        assert_eq!(t.upper_level(1.0), 0);
        assert_eq!(t.upper_level(60.0), 2);
    }

    #[test]
    fn zero_base_threshold_always_fires() {
        let mut t = trigger(0.0);
        assert!(evaluate(&mut t, 0.0));
        assert!(evaluate(&mut t, 100.0));
    }

    #[test]
    fn file_store_roundtrip_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.state");

        let store = FileLevelStore::new(&path);
        assert_eq!(store.load(), 0); // missing file is the normal state

        let mut t = AlertTrigger::new("persist", 5.0, Box::new(FileLevelStore::new(&path)));
        assert!(evaluate(&mut t, 80.0));
        assert_eq!(t.index(), 3);

        // Restart: a fresh trigger resumes at the persisted level.
        let t2 = AlertTrigger::new("persist", 5.0, Box::new(FileLevelStore::new(&path)));
        assert_eq!(t2.index(), 3);

        std::fs::write(&path, "not a number").unwrap();
        let t3 = AlertTrigger::new("persist", 5.0, Box::new(FileLevelStore::new(&path)));
        assert_eq!(t3.index(), 0);
    }

    #[test]
    fn oversized_persisted_index_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.state");
        std::fs::write(&path, "9").unwrap();
        let t = AlertTrigger::new("clamp", 5.0, Box::new(FileLevelStore::new(&path)));
        assert_eq!(t.index(), 3);
    }
}
