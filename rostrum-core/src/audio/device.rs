//! Input device enumeration and speech-capture recommendation.
//!
//! A classroom machine often exposes a mix of real microphones and
//! monitor/loopback endpoints that record system playback. Feeding a
//! monitor device into the pipeline transcribes the room speakers, not
//! the lecturer, so enumeration flags those and recommends the input
//! most likely to be a voice microphone.

use serde::{Deserialize, Serialize};

/// Metadata about one audio input endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable name reported by the OS.
    pub name: String,
    /// Whether this is the system default input.
    pub is_default: bool,
    /// Endpoint that records system playback rather than a microphone.
    pub is_monitor: bool,
    /// Best guess for capturing the lecturer's voice.
    pub is_recommended: bool,
}

const MONITOR_KEYWORDS: &[&str] = &[
    "stereo mix",
    "monitor of",
    "loopback",
    "what u hear",
    "what you hear",
    "wave out",
    "virtual output",
    "speakers (",
    "headphones (",
];

const VOICE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "lavalier",
    "lapel",
    "wireless",
    "usb",
    "webcam",
    "line in",
];

/// Heuristic for endpoints that capture system playback.
pub fn is_monitor_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    MONITOR_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for likely speech capture quality. Higher is
/// better; monitor endpoints score heavily negative.
pub fn speech_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_monitor_name(&lowered) { -16 } else { 8 };
    if VOICE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Enumerate input devices, flag monitors, and mark one recommendation.
///
/// Returns an empty list when no device is present.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("could not enumerate input devices: {e}");
            // At least surface the default input when the full listing fails.
            return match host.default_input_device().and_then(|d| d.name().ok()) {
                Some(name) => {
                    let is_monitor = is_monitor_name(&name);
                    vec![DeviceInfo {
                        name,
                        is_default: true,
                        is_monitor,
                        is_recommended: !is_monitor,
                    }]
                }
                None => Vec::new(),
            };
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_monitor: is_monitor_name(&name),
                is_recommended: false,
                name,
            }
        })
        .collect();

    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| speech_score(&d.name) + if d.is_default { 2 } else { 0 })
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        list[idx].is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_monitor,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::{is_monitor_name, speech_score};

    #[test]
    fn flags_playback_monitors() {
        assert!(is_monitor_name("Stereo Mix (Realtek Audio)"));
        assert!(is_monitor_name("Monitor of Built-in Audio"));
        assert!(is_monitor_name("Speakers (High Definition Audio Device)"));
        assert!(!is_monitor_name("Microphone Array (Intel Smart Sound)"));
    }

    #[test]
    fn real_microphones_outscore_monitors() {
        let lavalier = speech_score("Wireless Lavalier RX (USB Audio)");
        let builtin = speech_score("Built-in Input");
        let monitor = speech_score("Stereo Mix (Realtek Audio)");
        assert!(lavalier > builtin);
        assert!(builtin > monitor);
        assert!(monitor < 0);
    }
}
