//! Readings table and Prometheus text rendering

use driver::TemperatureSample;
use parking_lot::RwLock;
use std::fmt::Write;
use std::sync::Arc;

pub const METRIC_NAME: &str = "temper_temp";
const METRIC_HELP: &str = "The temperature measured by a TEMPer USB stick";

/// Latest sample per stick, indexed by catalog position
///
/// A `None` slot is a stick that has not been read yet or was retired.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    slots: Vec<Option<TemperatureSample>>,
}

pub type SharedReadings = Arc<RwLock<Readings>>;

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedReadings {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Size the table for `count` sticks, clearing any previous values
    pub fn reset(&mut self, count: usize) {
        self.slots.clear();
        self.slots.resize(count, None);
    }

    pub fn record(&mut self, index: usize, sample: TemperatureSample) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(sample);
    }

    /// Drop the value of a retired stick so it is no longer exported
    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    pub fn get(&self, index: usize) -> Option<TemperatureSample> {
        self.slots.get(index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(96 + self.slots.len() * 40);
        let _ = writeln!(out, "# HELP {} {}", METRIC_NAME, METRIC_HELP);
        let _ = writeln!(out, "# TYPE {} gauge", METRIC_NAME);

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(sample) = slot {
                let _ = writeln!(
                    out,
                    "{}{{stick=\"{}\"}} {:.6}",
                    METRIC_NAME, index, sample.celsius
                );
            }
        }

        out
    }
}
