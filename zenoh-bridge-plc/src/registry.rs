//! Signal registry: the single owner of signal records.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use plclink_common::{Signal, SignalDef, SignalValue};

use crate::error::PlcError;

/// Result of recording a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The value differs from the previous one.
    Changed,
    /// Same value as before.
    Unchanged,
    /// First value for a signal that had none.
    Initialized,
    /// No signal with that name.
    NotFound,
}

/// A signal after a value was recorded, with what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub signal: Signal,
    pub outcome: UpdateOutcome,
}

/// Registry state a poll cycle was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    generation: u64,
    writes: u64,
}

#[derive(Debug, Default)]
struct Table {
    signals: Vec<Signal>,
    index: HashMap<String, usize>,
    generation: u64,
    /// Completed writes, ever.
    writes: u64,
    /// Per signal, the value of `writes` after its last write.
    written: Vec<u64>,
    /// Per signal, writes started but not finished.
    in_flight: Vec<u32>,
}

impl Table {
    fn finish_write(&mut self, name: &str, completed: bool) {
        let Some(&idx) = self.index.get(name) else {
            return;
        };
        self.in_flight[idx] = self.in_flight[idx].saturating_sub(1);
        if completed {
            self.writes += 1;
            self.written[idx] = self.writes;
        }
    }

    /// Whether a read taken at `revision` may be older than a write.
    fn superseded(&self, name: &str, revision: Revision) -> bool {
        self.index
            .get(name)
            .is_some_and(|&idx| self.in_flight[idx] > 0 || self.written[idx] > revision.writes)
    }

    fn record(&mut self, name: &str, value: SignalValue, timestamp: i64) -> Option<Update> {
        let idx = *self.index.get(name)?;
        let signal = &mut self.signals[idx];
        let value = value.for_kind(signal.kind);

        let outcome = match signal.value {
            None => UpdateOutcome::Initialized,
            Some(previous) if previous == value => UpdateOutcome::Unchanged,
            Some(_) => UpdateOutcome::Changed,
        };

        if outcome != UpdateOutcome::Unchanged {
            signal.value = Some(value);
            signal.last_update = Some(timestamp);
        }

        Some(Update {
            signal: signal.clone(),
            outcome,
        })
    }
}

/// Thread-safe set of signals for one connection.
///
/// The whole set is replaced atomically by [`load`](Self::load): readers
/// observe either the old or the new set. The lock is never held across
/// an `.await`.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    table: RwLock<Table>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every definition, then swap in the new set.
    ///
    /// On error the current set is kept. Signals that survive a reload
    /// unchanged (same name, kind and address, no seeded value) keep their
    /// last value so no transition is lost across the swap.
    pub fn load(&self, defs: &[SignalDef]) -> Result<usize, PlcError> {
        let mut signals = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());

        for def in defs {
            let signal = Signal::from_def(def).map_err(|e| PlcError::Config(e.to_string()))?;
            if index.insert(signal.name.clone(), signals.len()).is_some() {
                return Err(PlcError::Config(format!(
                    "duplicate signal name '{}'",
                    signal.name
                )));
            }
            signals.push(signal);
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

        for (signal, def) in signals.iter_mut().zip(defs) {
            if def.value.is_some() {
                continue;
            }
            let previous = table
                .index
                .get(&signal.name)
                .map(|&idx| &table.signals[idx]);
            if let Some(prev) = previous {
                if prev.kind == signal.kind && prev.address == signal.address {
                    signal.value = prev.value;
                    signal.last_update = prev.last_update;
                }
            }
        }

        let count = signals.len();
        table.written = vec![0; count];
        table.in_flight = vec![0; count];
        table.signals = signals;
        table.index = index;
        table.generation += 1;

        Ok(count)
    }

    /// Look up a signal by name.
    pub fn get(&self, name: &str) -> Result<Signal, PlcError> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .index
            .get(name)
            .map(|&idx| table.signals[idx].clone())
            .ok_or_else(|| PlcError::NotFound(name.to_string()))
    }

    /// Consistent snapshot of every signal, in definition order.
    pub fn all(&self) -> Vec<Signal> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .signals
            .clone()
    }

    /// Snapshot together with the revision it belongs to.
    pub fn snapshot(&self) -> (Revision, Vec<Signal>) {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let revision = Revision {
            generation: table.generation,
            writes: table.writes,
        };
        (revision, table.signals.clone())
    }

    /// Number of successful loads so far.
    pub fn generation(&self) -> u64 {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .signals
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a value and report whether it changed.
    pub fn update_value(&self, name: &str, value: SignalValue, timestamp: i64) -> UpdateOutcome {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(name, value, timestamp)
            .map_or(UpdateOutcome::NotFound, |u| u.outcome)
    }

    /// Announce a write about to be sent to the PLC.
    ///
    /// Until [`set_written`](Self::set_written) or
    /// [`cancel_write`](Self::cancel_write), polled values of the signal are
    /// ignored so a read racing the write cannot overwrite its result.
    pub fn begin_write(&self, name: &str) -> Result<(), PlcError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let idx = *table
            .index
            .get(name)
            .ok_or_else(|| PlcError::NotFound(name.to_string()))?;
        table.in_flight[idx] += 1;
        Ok(())
    }

    /// Forget a write that failed.
    pub fn cancel_write(&self, name: &str) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .finish_write(name, false);
    }

    /// Record a completed write.
    ///
    /// Returns the updated signal, or `NotFound` if it was removed by a
    /// reload while the write was in flight.
    pub fn set_written(
        &self,
        name: &str,
        value: SignalValue,
        timestamp: i64,
    ) -> Result<Signal, PlcError> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let update = table
            .record(name, value, timestamp)
            .ok_or_else(|| PlcError::NotFound(name.to_string()))?;
        table.finish_write(name, true);
        Ok(update.signal)
    }

    /// Record the values of one poll cycle under a single write lock.
    ///
    /// Returns `None` without touching anything when the set was reloaded
    /// after `revision` was taken. Signals written after `revision` are
    /// skipped: their read may predate the write.
    pub fn apply_reads(
        &self,
        revision: Revision,
        reads: &[(String, SignalValue)],
        timestamp: i64,
    ) -> Option<Vec<Update>> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.generation != revision.generation {
            return None;
        }

        let mut updates = Vec::with_capacity(reads.len());
        for (name, value) in reads {
            if table.superseded(name, revision) {
                continue;
            }
            updates.extend(table.record(name, *value, timestamp));
        }
        Some(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::SignalKind;

    fn defs() -> Vec<SignalDef> {
        vec![
            SignalDef::new("start", 0, SignalKind::DigitalInputContact),
            SignalDef::new("lamp", 1, SignalKind::DigitalOutputCoil),
            SignalDef::new("temp", 10, SignalKind::HoldingRegister).with_value(72),
        ]
    }

    #[test]
    fn test_load_and_get() {
        let registry = SignalRegistry::new();
        assert_eq!(registry.load(&defs()).unwrap(), 3);
        assert_eq!(registry.generation(), 1);

        let temp = registry.get("temp").unwrap();
        assert_eq!(temp.kind, SignalKind::HoldingRegister);
        assert_eq!(temp.value, Some(SignalValue::Word(72)));

        assert!(matches!(registry.get("nope"), Err(PlcError::NotFound(_))));
        let names: Vec<_> = registry.all().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["start", "lamp", "temp"]);
    }

    #[test]
    fn test_failed_load_keeps_previous_set() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();

        let mut bad = defs();
        bad.push(SignalDef {
            name: "broken".to_string(),
            address: serde_json::json!(1),
            kind: "Analog Thing".to_string(),
            display_name: None,
            value: None,
        });
        assert!(matches!(registry.load(&bad), Err(PlcError::Config(_))));

        let mut dup = defs();
        dup.push(SignalDef::new("lamp", 9, SignalKind::DigitalOutputCoil));
        assert!(registry.load(&dup).is_err());

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_update_outcomes() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();

        assert_eq!(
            registry.update_value("start", SignalValue::Bool(false), 1),
            UpdateOutcome::Initialized
        );
        assert_eq!(
            registry.update_value("start", SignalValue::Bool(false), 2),
            UpdateOutcome::Unchanged
        );
        assert_eq!(
            registry.update_value("start", SignalValue::Bool(true), 3),
            UpdateOutcome::Changed
        );
        assert_eq!(
            registry.update_value("missing", SignalValue::Bool(true), 4),
            UpdateOutcome::NotFound
        );

        let start = registry.get("start").unwrap();
        assert_eq!(start.value, Some(SignalValue::Bool(true)));
        assert_eq!(start.last_update, Some(3));
    }

    #[test]
    fn test_values_normalized_to_kind() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();

        registry.update_value("lamp", SignalValue::Word(1), 1);
        assert_eq!(
            registry.get("lamp").unwrap().value,
            Some(SignalValue::Bool(true))
        );
    }

    #[test]
    fn test_stale_reads_discarded() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();
        let (revision, _) = registry.snapshot();

        registry.load(&defs()).unwrap();
        let reads = vec![("temp".to_string(), SignalValue::Word(99))];
        assert!(registry.apply_reads(revision, &reads, 5).is_none());
        assert_eq!(
            registry.get("temp").unwrap().value,
            Some(SignalValue::Word(72))
        );

        let (revision, _) = registry.snapshot();
        let updates = registry.apply_reads(revision, &reads, 6).unwrap();
        assert_eq!(updates[0].outcome, UpdateOutcome::Changed);
    }

    #[test]
    fn test_reads_older_than_a_write_are_skipped() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();
        let (revision, _) = registry.snapshot();

        registry.begin_write("temp").unwrap();
        let reads = vec![("temp".to_string(), SignalValue::Word(80))];
        let updates = registry.apply_reads(revision, &reads, 9).unwrap();
        assert!(updates.is_empty());

        registry
            .set_written("temp", SignalValue::Word(80), 10)
            .unwrap();

        let reads = vec![
            ("temp".to_string(), SignalValue::Word(75)),
            ("start".to_string(), SignalValue::Bool(true)),
        ];
        let updates = registry.apply_reads(revision, &reads, 11).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].signal.name, "start");
        assert_eq!(
            registry.get("temp").unwrap().value,
            Some(SignalValue::Word(80))
        );
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_reload_preserves_matching_values() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();
        registry.update_value("start", SignalValue::Bool(true), 1);

        let mut moved = defs();
        moved[1] = SignalDef::new("lamp", 7, SignalKind::DigitalOutputCoil);
        registry.update_value("lamp", SignalValue::Bool(true), 1);
        registry.load(&moved).unwrap();

        assert_eq!(
            registry.get("start").unwrap().value,
            Some(SignalValue::Bool(true))
        );
        assert_eq!(registry.get("lamp").unwrap().value, None);
    }

    #[test]
    fn test_set_written() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();

        let temp = registry
            .set_written("temp", SignalValue::Word(80), 10)
            .unwrap();
        assert_eq!(temp.value, Some(SignalValue::Word(80)));
        assert!(registry
            .set_written("ghost", SignalValue::Word(1), 10)
            .is_err());
        assert!(registry.begin_write("ghost").is_err());
    }

    #[test]
    fn test_cancelled_write_releases_signal() {
        let registry = SignalRegistry::new();
        registry.load(&defs()).unwrap();

        registry.begin_write("lamp").unwrap();
        registry.cancel_write("lamp");

        let (revision, _) = registry.snapshot();
        let reads = vec![("lamp".to_string(), SignalValue::Bool(true))];
        let updates = registry.apply_reads(revision, &reads, 3).unwrap();
        assert_eq!(updates[0].outcome, UpdateOutcome::Initialized);
    }
}
