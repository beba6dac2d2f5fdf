// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Voice-Activity Detector (spec §4.7): a multi-frame SSB blob finder over
//! a sliding window of FFT-bin frames. Self-contained — no channels, no
//! locks besides the stability cache. Numeric style grounded on the plain
//! `f32`/window-based processing of `trx-backend-soapysdr::dsp::spectrum`;
//! the percentile/mean/stddev helpers themselves live in `hfr_core::stats`.
//!
//! `detect_in_window` is the pure, stateless algorithm (spec §4.7 steps
//! 1–7): noise floor, candidate regions, multi-frame tracking, persistence,
//! voice-likeness filters, dial-frequency inference, confidence scoring.
//! `VoiceActivityDetector::scan` additionally applies the cross-scan-cycle
//! stability cache (step 8), which the HTTP surface co-located in §4.5 is
//! what actually calls across repeated polls — see DESIGN.md for why the
//! two are split (the literal feed-one-window scenario in spec §8 exercises
//! `detect_in_window` directly, the stability cache needs ≥2 *separate*
//! scans by construction).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hfr_core::stats::{mean, percentile, stddev};

/// Amateur bands explicitly excluded from detection (spec §4.7): 2200 m,
/// 630 m, 30 m — narrow, low-power, or digital-heavy allocations where the
/// SSB blob heuristic is known to misfire.
const EXCLUDED_BANDS_HZ: [(u64, u64); 3] = [
    (135_700, 137_800),  // 2200 m
    (472_000, 479_000),  // 630 m
    (10_100_000, 10_150_000), // 30 m
];

fn is_excluded_band(center_hz: u64) -> bool {
    EXCLUDED_BANDS_HZ
        .iter()
        .any(|&(lo, hi)| center_hz >= lo && center_hz <= hi)
}

/// One scan frame: FFT bin magnitudes in dB, fftshifted so `bins[0]` is the
/// lowest frequency, plus the radio parameters needed to map bin index to
/// absolute frequency.
#[derive(Debug, Clone)]
pub struct VadFrame {
    pub bins: Vec<f32>,
    pub center_hz: u64,
    pub bin_bw_hz: u32,
}

impl VadFrame {
    fn bin_freq(&self, index: usize) -> i64 {
        let half = self.bins.len() as i64 / 2;
        self.center_hz as i64 + (index as i64 - half) * self.bin_bw_hz as i64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub min_confidence: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        VadConfig {
            min_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialMode {
    Usb,
    Lsb,
}

impl DialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialMode::Usb => "USB",
            DialMode::Lsb => "LSB",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub mode: DialMode,
    pub estimated_dial_freq: u64,
    pub alt_dial_freqs: Vec<u64>,
    pub confidence: f32,
    pub lower_edge_hz: u64,
    pub upper_edge_hz: u64,
}

// --- bin-range region detection -------------------------------------------------

type BinRange = (usize, usize); // [start, end)

fn find_candidate_regions(bins: &[f32], threshold: f32, bin_bw_hz: u32) -> Vec<BinRange> {
    let above: Vec<bool> = bins.iter().map(|&b| b > threshold).collect();
    let n = above.len();
    let mut regions = Vec::new();
    let mut i = 0;
    while i < n {
        if above[i] {
            let start = i;
            while i < n && above[i] {
                i += 1;
            }
            let end = i;
            if end - start >= 3 && bracketed_by_quiet(&above, start, end) {
                let width_hz = (end - start) as u32 * bin_bw_hz;
                if (1500..=4000).contains(&width_hz) {
                    regions.push((start, end));
                }
            }
        } else {
            i += 1;
        }
    }
    regions
}

fn bracketed_by_quiet(above: &[bool], start: usize, end: usize) -> bool {
    let pre_from = start.saturating_sub(3);
    let pre_ok = start < 3 || above[pre_from..start].iter().all(|&a| !a);
    let post_to = (end + 3).min(above.len());
    let post_ok = end + 3 > above.len() || above[end..post_to].iter().all(|&a| !a);
    pre_ok && post_ok
}

// --- multi-frame tracking --------------------------------------------------------

struct TrackedRegion {
    range: BinRange,
    hits: u32,
    power_samples: Vec<f32>,
    last_frame_index: usize,
    last_noise_floor: f32,
}

fn ranges_overlap(a: BinRange, b: BinRange, tolerance: usize) -> bool {
    let a_lo = a.0.saturating_sub(tolerance);
    let a_hi = a.1 + tolerance;
    a_lo < b.1 && b.0 < a_hi
}

/// Pure, stateless multi-frame detection (spec §4.7 steps 1–7).
pub fn detect_in_window(frames: &[VadFrame], config: &VadConfig) -> Vec<RawDetection> {
    if frames.is_empty() {
        return Vec::new();
    }
    if is_excluded_band(frames[0].center_hz) {
        return Vec::new();
    }

    let mut tracked: Vec<TrackedRegion> = Vec::new();

    for (frame_idx, frame) in frames.iter().enumerate() {
        let noise = percentile(&frame.bins, 10.0);
        let threshold = noise + 8.0;
        let candidates = find_candidate_regions(&frame.bins, threshold, frame.bin_bw_hz);

        for range in candidates {
            let region_power = mean(&frame.bins[range.0..range.1]);
            if let Some(existing) = tracked
                .iter_mut()
                .find(|t| ranges_overlap(t.range, range, 2))
            {
                existing.range = range;
                existing.hits += 1;
                existing.power_samples.push(region_power);
                existing.last_frame_index = frame_idx;
                existing.last_noise_floor = noise;
            } else {
                tracked.push(TrackedRegion {
                    range,
                    hits: 1,
                    power_samples: vec![region_power],
                    last_frame_index: frame_idx,
                    last_noise_floor: noise,
                });
            }
        }
    }

    let total_frames = frames.len();
    let mut detections = Vec::new();

    for region in tracked {
        if (region.hits as f32 / total_frames as f32) < 0.3 {
            continue;
        }

        let last_frame = &frames[region.last_frame_index];
        let region_bins = &last_frame.bins[region.range.0..region.range.1];

        if !passes_voice_likeness(region_bins, region.last_noise_floor, &region.power_samples) {
            continue;
        }

        let Some(detection) =
            infer_dial_frequency(last_frame, region.range, region_bins, region.last_noise_floor)
        else {
            continue;
        };

        if detection.confidence >= config.min_confidence {
            detections.push(detection);
        }
    }

    detections
}

fn passes_voice_likeness(region_bins: &[f32], noise: f32, power_samples: &[f32]) -> bool {
    let region_max = region_bins.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let region_median = percentile(region_bins, 50.0);
    if region_max - region_median >= 20.0 {
        return false; // tonality: rejects CW/carriers
    }

    let region_stddev = stddev(region_bins);
    let region_mean = mean(region_bins);
    let above_half_std = region_bins
        .iter()
        .filter(|&&b| b > region_mean - 0.5 * region_stddev)
        .count();
    let frac_above = above_half_std as f32 / region_bins.len() as f32;
    if !(region_stddev >= 3.0 && frac_above >= 0.4) {
        return false; // spectral variance: rejects flat noise / narrow digital
    }

    let occupied = region_bins.iter().filter(|&&b| b > noise + 6.0).count();
    if (occupied as f32 / region_bins.len() as f32) < 0.5 {
        return false; // bandwidth occupancy
    }

    if power_samples.len() > 1 {
        let peak = power_samples.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let trough = power_samples.iter().cloned().fold(f32::INFINITY, f32::min);
        let samples_std = stddev(power_samples);
        if peak - trough < 2.0 && samples_std < 1.5 {
            return false; // syllabic modulation: too static
        }
        let samples_mean = mean(power_samples);
        let within_band = power_samples
            .iter()
            .filter(|&&p| (p - samples_mean).abs() <= 1.5)
            .count();
        if (within_band as f32 / power_samples.len() as f32) > 0.85 {
            return false; // too static across frames
        }
    }

    true
}

fn scan_low_cut(region_bins: &[f32], from_top: bool, bin_bw_hz: u32) -> f32 {
    let thresh = percentile(region_bins, 70.0) - 8.0;
    let n = region_bins.len();
    let indices: Vec<usize> = if from_top {
        (0..n).rev().collect()
    } else {
        (0..n).collect()
    };

    let mut steps = 0usize;
    for idx in indices {
        if region_bins[idx] > thresh {
            break;
        }
        steps += 1;
    }
    ((steps * bin_bw_hz as usize) as f32).clamp(100.0, 600.0)
}

fn smart_round(freq_hz: f32) -> u64 {
    let nearest_1k = (freq_hz / 1000.0).round() * 1000.0;
    if (freq_hz - nearest_1k).abs() <= 600.0 {
        return nearest_1k.max(0.0) as u64;
    }
    let nearest_500 = (freq_hz / 500.0).round() * 500.0;
    if (freq_hz - nearest_500).abs() <= 200.0 {
        return nearest_500.max(0.0) as u64;
    }
    ((freq_hz / 100.0).round() * 100.0).max(0.0) as u64
}

fn infer_dial_frequency(
    frame: &VadFrame,
    range: BinRange,
    region_bins: &[f32],
    noise: f32,
) -> Option<RawDetection> {
    let lower_edge_hz = frame.bin_freq(range.0).max(0) as u64;
    let upper_edge_hz = frame.bin_freq(range.1.saturating_sub(1)).max(0) as u64;
    let bw_hz = (range.1 - range.0) as u32 * frame.bin_bw_hz;

    let mode = if frame.center_hz < 10_000_000 {
        DialMode::Lsb
    } else {
        DialMode::Usb
    };

    let from_top = mode == DialMode::Lsb;
    let low_cut = scan_low_cut(region_bins, from_top, frame.bin_bw_hz);

    let raw_dial = match mode {
        DialMode::Lsb => upper_edge_hz as f32 + low_cut,
        DialMode::Usb => lower_edge_hz as f32 - low_cut,
    };
    if raw_dial < 0.0 {
        return None;
    }
    let estimated_dial_freq = smart_round(raw_dial);

    let mut alts = Vec::new();
    for &alt_low_cut in &[200.0_f32, 300.0, 400.0, 500.0] {
        let raw = match mode {
            DialMode::Lsb => upper_edge_hz as f32 + alt_low_cut,
            DialMode::Usb => lower_edge_hz as f32 - alt_low_cut,
        };
        if raw >= 0.0 {
            let rounded = smart_round(raw);
            if !alts.contains(&rounded) {
                alts.push(rounded);
            }
        }
    }

    let peak = region_bins.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let snr_db = peak - noise;
    let snr_term = (snr_db / 30.0).clamp(0.0, 1.0);
    let bw_term = (1.0 - (bw_hz as f32 - 2700.0).abs() / 1000.0).max(0.0);
    let low_cut_term = if (200.0..=400.0).contains(&low_cut) {
        1.0
    } else if (100.0..=600.0).contains(&low_cut) {
        0.1
    } else {
        0.0
    };
    let confidence = (0.4 * snr_term + 0.3 * bw_term + 0.2 * low_cut_term + 0.05).clamp(0.0, 1.0);

    Some(RawDetection {
        mode,
        estimated_dial_freq,
        alt_dial_freqs: alts,
        confidence,
        lower_edge_hz,
        upper_edge_hz,
    })
}

// --- stability cache (cross-scan-cycle, spec §4.7 step 8 / §4.5) ---------------

struct StabilityEntry {
    count: u32,
    first_seen: Instant,
    last_seen: Instant,
}

const STABILITY_WINDOW: Duration = Duration::from_secs(90);

pub struct VoiceActivityDetector {
    config: VadConfig,
    cache: Mutex<HashMap<u64, StabilityEntry>>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        VoiceActivityDetector {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Run one scan cycle: detect in this window, then only surface
    /// detections whose dial frequency (rounded to 500 Hz) has been seen at
    /// least twice within the last 90 s across scan cycles.
    pub fn scan(&self, frames: &[VadFrame]) -> Vec<RawDetection> {
        let raw = detect_in_window(frames, &self.config);
        let now = Instant::now();
        let mut cache = self.cache.lock().expect("vad stability cache poisoned");
        cache.retain(|_, e| now.duration_since(e.last_seen) < STABILITY_WINDOW);

        let mut stable = Vec::new();
        for detection in raw {
            let key = (detection.estimated_dial_freq / 500) * 500;
            let entry = cache.entry(key).or_insert_with(|| StabilityEntry {
                count: 0,
                first_seen: now,
                last_seen: now,
            });
            entry.count += 1;
            entry.last_seen = now;
            if entry.count >= 2 {
                stable.push(detection);
            }
        }
        stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_voice_frame(center_hz: u64, seed_offset: f32) -> VadFrame {
        let bin_bw_hz = 500u32;
        let bin_count = 60usize;
        let mut bins = vec![-90.0_f32; bin_count];
        // 2500 Hz-wide blob, 12 dB above noise, centered on the frame.
        let blob_bins = 2500 / bin_bw_hz as usize; // 5 bins
        let mid = bin_count / 2;
        let start = mid - blob_bins / 2;
        for i in 0..blob_bins {
            let wiggle = ((i as f32 + seed_offset) * 0.9).sin() * 2.0;
            bins[start + i] = -90.0 + 12.0 + wiggle;
        }
        VadFrame {
            bins,
            center_hz,
            bin_bw_hz,
        }
    }

    #[test]
    fn detects_synthetic_ssb_voice_blob_on_20m() {
        let center = 14_203_500u64;
        let frames: Vec<VadFrame> = (0..25)
            .map(|i| synthetic_voice_frame(center, i as f32))
            .collect();

        let detections = detect_in_window(&frames, &VadConfig::default());
        assert_eq!(detections.len(), 1, "{detections:?}");
        let d = &detections[0];
        assert_eq!(d.mode, DialMode::Usb);
        assert!(
            d.estimated_dial_freq.abs_diff(center) <= 100,
            "dial={} center={}",
            d.estimated_dial_freq,
            center
        );
        assert!(d.confidence >= 0.7, "confidence={}", d.confidence);
    }

    #[test]
    fn excluded_bands_return_empty() {
        let frames: Vec<VadFrame> = (0..25)
            .map(|i| synthetic_voice_frame(10_125_000, i as f32)) // inside 30 m
            .collect();
        assert!(detect_in_window(&frames, &VadConfig::default()).is_empty());
    }

    #[test]
    fn flat_noise_produces_no_detections() {
        let frames: Vec<VadFrame> = (0..25)
            .map(|_| VadFrame {
                bins: vec![-90.0; 60],
                center_hz: 14_000_000,
                bin_bw_hz: 500,
            })
            .collect();
        assert!(detect_in_window(&frames, &VadConfig::default()).is_empty());
    }

    #[test]
    fn stability_cache_requires_two_scan_cycles() {
        let center = 14_203_500u64;
        let frames: Vec<VadFrame> = (0..25)
            .map(|i| synthetic_voice_frame(center, i as f32))
            .collect();
        let vad = VoiceActivityDetector::new(VadConfig::default());
        assert!(vad.scan(&frames).is_empty(), "first scan should not surface yet");
        assert_eq!(vad.scan(&frames).len(), 1, "second scan should surface it");
    }
}
