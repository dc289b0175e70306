//! Local copy of the controller's timing table.
//!
//! The table has a fixed number of slots set by the firmware revision. Each
//! slot holds an RPM breakpoint and the raw value the controller stores for
//! it. On CDI firmware the raw value is relative to the reference shift
//! angle: the effective timing is `shift - raw`. Revisions without a shift
//! store the timing directly.

use ignitor_core::{Error, Result};

use crate::revisions::Revision;

/// One slot of the timing table, as stored on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingRecord {
    /// RPM breakpoint.
    pub rpm: u16,
    /// Raw timing value as sent on the wire.
    pub timing_raw: u16,
}

/// Fixed-size timing table plus the reference shift it is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    slots: Vec<TimingRecord>,
    shift: Option<u16>,
}

impl RecordTable {
    /// An all-zero table with `slots` entries.
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![TimingRecord::default(); slots],
            shift: None,
        }
    }

    /// Number of slots. Never changes after construction.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read one slot.
    pub fn get(&self, slot: usize) -> Option<TimingRecord> {
        self.slots.get(slot).copied()
    }

    /// Overwrite one slot.
    pub fn set(&mut self, slot: usize, record: TimingRecord) -> Result<()> {
        let len = self.slots.len();
        let entry = self.slots.get_mut(slot).ok_or_else(|| {
            Error::InvalidParameter(format!("slot {slot} out of range (table has {len})"))
        })?;
        *entry = record;
        Ok(())
    }

    /// All slots in order.
    pub fn records(&self) -> &[TimingRecord] {
        &self.slots
    }

    /// Reference shift angle, once it has been read or written.
    pub fn shift(&self) -> Option<u16> {
        self.shift
    }

    pub fn set_shift(&mut self, shift: Option<u16>) {
        self.shift = shift;
    }

    /// Effective timing of a slot.
    ///
    /// `shift - raw` when a shift is known, otherwise the raw value. May be
    /// negative for a slot edited past the shift; `None` for an out-of-range
    /// slot.
    pub fn computed_value(&self, slot: usize) -> Option<i32> {
        let record = self.get(slot)?;
        let raw = record.timing_raw as i32;
        match self.shift {
            Some(shift) => Some(shift as i32 - raw),
            None => Some(raw),
        }
    }

    /// Check every slot against the revision's bounds before a store.
    ///
    /// The first offending slot is named in the [`Error::Validation`].
    pub fn validate(&self, revision: &Revision) -> Result<()> {
        for (slot, record) in self.slots.iter().enumerate() {
            if record.rpm > revision.rpm_max {
                return Err(Error::Validation(format!(
                    "slot {slot}: rpm {} above {}",
                    record.rpm, revision.rpm_max
                )));
            }
            if record.timing_raw > revision.value_max {
                return Err(Error::Validation(format!(
                    "slot {slot}: value {} above {}",
                    record.timing_raw, revision.value_max
                )));
            }
            if let Some(computed) = self.computed_value(slot) {
                if computed < 0 || computed > revision.value_max as i32 {
                    return Err(Error::Validation(format!(
                        "slot {slot}: timing {computed} outside 0..={}",
                        revision.value_max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the raw slot value for an operator-entered timing.
    ///
    /// The timing must lie within the revision's timing range, and on
    /// shift-relative firmware the shift must already be known.
    pub fn raw_for_timing(&self, revision: &Revision, timing: u16) -> Result<u16> {
        if timing < revision.timing_min || timing > revision.timing_max {
            return Err(Error::InvalidParameter(format!(
                "timing {timing} outside {}..={}",
                revision.timing_min, revision.timing_max
            )));
        }
        if !revision.has_shift() {
            return Ok(timing);
        }
        let shift = self
            .shift
            .ok_or_else(|| Error::InvalidParameter("shift not known yet".into()))?;
        shift.checked_sub(timing).ok_or_else(|| {
            Error::InvalidParameter(format!("timing {timing} exceeds shift {shift}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revisions::{cdi, timing_meter};

    fn rec(rpm: u16, timing_raw: u16) -> TimingRecord {
        TimingRecord { rpm, timing_raw }
    }

    #[test]
    fn new_table_is_zeroed_and_fixed_size() {
        let table = RecordTable::new(11);
        assert_eq!(table.len(), 11);
        assert!(table.records().iter().all(|r| *r == TimingRecord::default()));
        assert!(table.get(11).is_none());
        assert!(table.shift().is_none());
    }

    #[test]
    fn set_out_of_range_slot_is_rejected() {
        let mut table = RecordTable::new(3);
        assert!(table.set(2, rec(1000, 10)).is_ok());
        assert!(matches!(
            table.set(3, rec(1000, 10)),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn computed_value_relative_to_shift() {
        let mut table = RecordTable::new(2);
        table.set(0, rec(1620, 20)).unwrap();
        assert_eq!(table.computed_value(0), Some(20));
        table.set_shift(Some(30));
        assert_eq!(table.computed_value(0), Some(10));
        table.set(1, rec(1860, 35)).unwrap();
        assert_eq!(table.computed_value(1), Some(-5));
    }

    #[test]
    fn validate_accepts_firmware_defaults() {
        let rev = cdi();
        let mut table = RecordTable::new(rev.record_slots);
        table.set_shift(Some(5));
        let rpms = [60, 1620, 1860, 2100, 2340, 2580, 2820, 3060, 3300, 3540, 5100];
        for (slot, rpm) in rpms.into_iter().enumerate() {
            table.set(slot, rec(rpm, 0)).unwrap();
        }
        assert!(table.validate(&rev).is_ok());
    }

    #[test]
    fn validate_names_offending_slot() {
        let rev = cdi();
        let mut table = RecordTable::new(rev.record_slots);
        table.set_shift(Some(40));
        table.set(4, rec(5200, 10)).unwrap();
        match table.validate(&rev) {
            Err(Error::Validation(msg)) => assert!(msg.contains("slot 4"), "{msg}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_negative_timing() {
        let rev = cdi();
        let mut table = RecordTable::new(rev.record_slots);
        table.set_shift(Some(10));
        table.set(7, rec(3000, 12)).unwrap();
        match table.validate(&rev) {
            Err(Error::Validation(msg)) => assert!(msg.contains("slot 7"), "{msg}"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_raw_above_limit_without_shift() {
        let rev = timing_meter();
        let mut table = RecordTable::new(rev.record_slots);
        table.set(0, rec(1000, 31)).unwrap();
        assert!(matches!(table.validate(&rev), Err(Error::Validation(_))));
    }

    #[test]
    fn raw_for_timing_cdi() {
        let rev = cdi();
        let mut table = RecordTable::new(rev.record_slots);
        assert!(table.raw_for_timing(&rev, 10).is_err());
        table.set_shift(Some(40));
        assert_eq!(table.raw_for_timing(&rev, 10).unwrap(), 30);
        assert!(table.raw_for_timing(&rev, 4).is_err());
        assert!(table.raw_for_timing(&rev, 33).is_err());
    }

    #[test]
    fn raw_for_timing_meter_is_identity() {
        let rev = timing_meter();
        let table = RecordTable::new(rev.record_slots);
        assert_eq!(table.raw_for_timing(&rev, 12).unwrap(), 12);
    }
}
