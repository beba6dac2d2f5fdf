// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Small numeric helpers shared by the spectrum delta encoder and the VAD.
//! Plain `f32` arithmetic, no external stats crate — kept in the same
//! dependency-light style as the reference DSP code.

/// Percentile (0..=100) of a slice of magnitudes, by sorting a copy.
/// Used for the VAD's noise-floor estimate (spec §4.7 step 1).
pub fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f32).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

pub fn median(values: &[f32]) -> f32 {
    percentile(values, 50.0)
}

pub fn stddev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

pub fn max(values: &[f32]) -> f32 {
    values.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

pub fn min(values: &[f32]) -> f32 {
    values.iter().cloned().fold(f32::INFINITY, f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_sorted_run() {
        let v: Vec<f32> = (0..10).map(|x| x as f32).collect();
        assert_eq!(percentile(&v, 0.0), 0.0);
        assert_eq!(percentile(&v, 100.0), 9.0);
        assert_eq!(percentile(&v, 10.0), 1.0);
    }

    #[test]
    fn stddev_of_constant_is_zero() {
        let v = vec![5.0_f32; 10];
        assert_eq!(stddev(&v), 0.0);
        assert_eq!(mean(&v), 5.0);
    }

    #[test]
    fn empty_inputs_are_safe() {
        let v: Vec<f32> = vec![];
        assert_eq!(percentile(&v, 50.0), 0.0);
        assert_eq!(mean(&v), 0.0);
        assert_eq!(stddev(&v), 0.0);
    }
}
