//! Input device enumeration and ranking.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name reported by the OS; also the value stored as the preferred device.
    pub name: String,
    pub is_default: bool,
    /// Likely captures system output rather than the room.
    pub is_loopback_like: bool,
    /// Best-ranked microphone in the list.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "usb",
    "webcam",
    "built-in",
];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a better room microphone. Loopback devices always rank last.
pub fn mic_preference_score(name: &str, is_default: bool) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if is_default {
        score += 2;
    }
    score
}

/// Build the sorted device list from raw names: recommended first, loopback last.
pub fn rank_devices(names: Vec<String>, default_name: Option<&str>) -> Vec<DeviceInfo> {
    let mut list: Vec<DeviceInfo> = names
        .into_iter()
        .map(|name| DeviceInfo {
            is_default: default_name == Some(name.as_str()),
            is_loopback_like: is_loopback_like_name(&name),
            is_recommended: false,
            name,
        })
        .collect();

    if let Some(best) = list
        .iter_mut()
        .filter(|d| !d.is_loopback_like)
        .max_by_key(|d| mic_preference_score(&d.name, d.is_default))
    {
        best.is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

/// All input devices on the default host. Empty if none can be listed.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let names = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, d)| d.name().unwrap_or_else(|_| format!("Input Device {}", idx + 1)))
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            default_name.iter().cloned().collect()
        }
    };
    rank_devices(names, default_name.as_deref())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}
