//! A mock instrument rack that generates synthetic data.
//!
//! `MockRack` holds a set of named channels behind a shared lock. Source
//! parameters write a channel when swept; readout parameters compute a
//! response from the current channel values, optionally with Gaussian-ish
//! noise on top. Scans built against the rack exercise the full engine and
//! storage path without any hardware attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::parameter::Param;
use crate::sample::Sample;

/// Snapshot of channel values handed to readout closures.
pub type Channels = HashMap<String, f64>;

/// A simulated instrument rack with named scalar channels.
#[derive(Clone, Default)]
pub struct MockRack {
    channels: Arc<Mutex<Channels>>,
}

impl MockRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a channel, 0.0 if it was never written.
    pub fn channel(&self, name: &str) -> f64 {
        self.channels
            .lock()
            .expect("mock rack lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0.0)
    }

    /// Write a channel directly, bypassing any parameter.
    pub fn set_channel(&self, name: &str, value: f64) {
        self.channels
            .lock()
            .expect("mock rack lock poisoned")
            .insert(name.to_string(), value);
    }

    /// A settable parameter backed by the channel of the same name.
    ///
    /// The getter reads the channel back, so the parameter behaves like a
    /// real source with readback.
    pub fn source_param(&self, label: &str, units: &str) -> Param {
        let name = label.to_string();
        let write = self.channels.clone();
        let read = self.channels.clone();
        let read_name = name.clone();
        Param::new(label)
            .with_units(units)
            .with_setter(move |value| {
                write
                    .lock()
                    .expect("mock rack lock poisoned")
                    .insert(name.clone(), value);
                Ok(())
            })
            .with_getter(move || {
                let v = read
                    .lock()
                    .expect("mock rack lock poisoned")
                    .get(&read_name)
                    .copied()
                    .unwrap_or(0.0);
                Ok(Sample::from(v))
            })
    }

    /// A read-only parameter whose value is `response(channels) + noise`,
    /// with noise drawn uniformly from `±noise` on each measurement.
    pub fn readout_param(
        &self,
        label: &str,
        units: &str,
        noise: f64,
        response: impl Fn(&Channels) -> f64 + Send + 'static,
    ) -> Param {
        let channels = self.channels.clone();
        Param::new(label).with_units(units).with_getter(move || {
            let clean = response(&channels.lock().expect("mock rack lock poisoned"));
            let jitter = if noise > 0.0 {
                rand::thread_rng().gen_range(-noise..=noise)
            } else {
                0.0
            };
            Ok(Sample::from(clean + jitter))
        })
    }

    /// A read-only parameter returning a fixed-shape array, e.g. a simulated
    /// camera frame or spectrum. Each element gets independent noise.
    pub fn frame_param(
        &self,
        label: &str,
        units: &str,
        shape: &[usize],
        noise: f64,
        response: impl Fn(&Channels, usize) -> f64 + Send + 'static,
    ) -> Param {
        let channels = self.channels.clone();
        let shape = shape.to_vec();
        let len: usize = shape.iter().product();
        Param::new(label).with_units(units).with_getter(move || {
            let snapshot = channels.lock().expect("mock rack lock poisoned").clone();
            let mut rng = rand::thread_rng();
            let data = (0..len)
                .map(|i| {
                    let jitter = if noise > 0.0 {
                        rng.gen_range(-noise..=noise)
                    } else {
                        0.0
                    };
                    response(&snapshot, i) + jitter
                })
                .collect();
            Ok(Sample::array(shape.clone(), data))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_param_writes_and_reads_back() {
        let rack = MockRack::new();
        let mut gate = rack.source_param("V_gate", "V");
        gate.set(0.35).unwrap();
        assert_eq!(rack.channel("V_gate"), 0.35);
        gate.measure().unwrap();
        assert_eq!(gate.last_value().unwrap().as_scalar(), Some(0.35));
    }

    #[test]
    fn readout_tracks_channels_without_noise() {
        let rack = MockRack::new();
        rack.set_channel("V_gate", 2.0);
        rack.set_channel("V_bias", 0.5);
        let mut current = rack.readout_param("I_sd", "nA", 0.0, |ch| {
            10.0 * ch.get("V_gate").copied().unwrap_or(0.0)
                + ch.get("V_bias").copied().unwrap_or(0.0)
        });
        current.measure().unwrap();
        assert_eq!(current.last_value().unwrap().as_scalar(), Some(20.5));
    }

    #[test]
    fn frame_param_has_fixed_shape() {
        let rack = MockRack::new();
        rack.set_channel("bg", 1.0);
        let mut spectrum = rack.frame_param("spectrum", "counts", &[4], 0.0, |ch, i| {
            ch.get("bg").copied().unwrap_or(0.0) + i as f64
        });
        spectrum.measure().unwrap();
        let s = spectrum.last_value().unwrap();
        assert_eq!(s.shape(), &[4]);
        assert_eq!(s.data(), &[1.0, 2.0, 3.0, 4.0]);
    }
}
