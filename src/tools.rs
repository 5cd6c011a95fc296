//! Tool definitions and the tool rack.
//!
//! A tool is a numbered collection of extruder drives and heaters with
//! active and standby temperature setpoints (`M563` defines one, `T<n>`
//! selects one). Tools are registered once and never removed; the rack
//! hands out stable indices and tracks which tool, if any, is current.

use crate::{EXTRUDERS, HEATERS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {0} is already defined")]
    AlreadyDefined(i32),
}

#[derive(Debug, Clone)]
pub struct Tool {
    number: i32,
    /// Extruder drive indices relative to the first extruder drive.
    drives: Vec<usize>,
    heaters: Vec<usize>,
    active_temperatures: Vec<f64>,
    standby_temperatures: Vec<f64>,
}

impl Tool {
    pub fn new(number: i32, drives: Vec<usize>, heaters: Vec<usize>) -> Self {
        let heater_count = heaters.len();
        Self {
            number,
            drives,
            heaters,
            active_temperatures: vec![0.0; heater_count],
            standby_temperatures: vec![0.0; heater_count],
        }
    }

    pub fn number(&self) -> i32 {
        self.number
    }

    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }

    /// Extruder drive index (0-based among extruders) of the tool's n-th drive.
    pub fn drive(&self, n: usize) -> usize {
        self.drives[n]
    }

    pub fn heater_count(&self) -> usize {
        self.heaters.len()
    }

    pub fn heater(&self, n: usize) -> usize {
        self.heaters[n]
    }

    pub fn active_temperature(&self, n: usize) -> f64 {
        self.active_temperatures[n]
    }

    pub fn standby_temperature(&self, n: usize) -> f64 {
        self.standby_temperatures[n]
    }

    pub fn set_variables(&mut self, standby: &[f64], active: &[f64]) {
        for h in 0..self.heaters.len() {
            if let Some(&t) = standby.get(h) {
                self.standby_temperatures[h] = t;
            }
            if let Some(&t) = active.get(h) {
                self.active_temperatures[h] = t;
            }
        }
    }
}

/// Append-only registry of tools plus the current selection.
#[derive(Default)]
pub struct ToolRack {
    tools: Vec<Tool>,
    current: Option<usize>,
}

impl ToolRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Drive and heater indices outside the machine are
    /// dropped with a warning rather than rejected, so a config written
    /// for a bigger machine still loads.
    pub fn add(&mut self, number: i32, drives: &[usize], heaters: &[usize]) -> Result<(), ToolError> {
        if self.tools.iter().any(|t| t.number == number) {
            return Err(ToolError::AlreadyDefined(number));
        }
        let drives: Vec<usize> = drives
            .iter()
            .copied()
            .filter(|&d| {
                if d >= EXTRUDERS {
                    tracing::warn!("tool {}: dropping out-of-range drive {}", number, d);
                    false
                } else {
                    true
                }
            })
            .collect();
        let heaters: Vec<usize> = heaters
            .iter()
            .copied()
            .filter(|&h| {
                if h >= HEATERS {
                    tracing::warn!("tool {}: dropping out-of-range heater {}", number, h);
                    false
                } else {
                    true
                }
            })
            .collect();
        self.tools.push(Tool::new(number, drives, heaters));
        Ok(())
    }

    pub fn get(&self, number: i32) -> Option<&Tool> {
        self.tools.iter().find(|t| t.number == number)
    }

    pub fn get_mut(&mut self, number: i32) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| t.number == number)
    }

    pub fn current(&self) -> Option<&Tool> {
        self.current.map(|i| &self.tools[i])
    }

    pub fn current_number(&self) -> Option<i32> {
        self.current().map(|t| t.number)
    }

    /// Select the given tool; selecting a number that does not exist
    /// deselects all tools.
    pub fn select(&mut self, number: i32) {
        self.current = self.tools.iter().position(|t| t.number == number);
    }

    pub fn deselect(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_select() {
        let mut rack = ToolRack::new();
        rack.add(0, &[0], &[1]).unwrap();
        rack.add(1, &[1], &[2]).unwrap();

        assert!(rack.current().is_none());
        rack.select(1);
        assert_eq!(rack.current_number(), Some(1));

        // Selecting an unknown tool deselects.
        rack.select(7);
        assert!(rack.current().is_none());
    }

    #[test]
    fn duplicate_number_rejected() {
        let mut rack = ToolRack::new();
        rack.add(0, &[0], &[1]).unwrap();
        assert!(rack.add(0, &[1], &[2]).is_err());
    }

    #[test]
    fn out_of_range_indices_dropped() {
        let mut rack = ToolRack::new();
        rack.add(2, &[0, 9], &[1, 9]).unwrap();
        let tool = rack.get(2).unwrap();
        assert_eq!(tool.drive_count(), 1);
        assert_eq!(tool.heater_count(), 1);
    }

    #[test]
    fn temperatures_update_together() {
        let mut rack = ToolRack::new();
        rack.add(0, &[0], &[1, 2]).unwrap();
        let tool = rack.get_mut(0).unwrap();
        tool.set_variables(&[150.0, 140.0], &[210.0, 205.0]);
        assert_eq!(tool.active_temperature(0), 210.0);
        assert_eq!(tool.standby_temperature(1), 140.0);
    }
}
