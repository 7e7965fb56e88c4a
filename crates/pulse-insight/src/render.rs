//! Vibe card hand-off.
//!
//! The pipeline only produces structured card data. Turning it into pixels is
//! the job of a [`VibeCardRenderer`]; the bundled [`ManifestCardRenderer`]
//! writes a JSON manifest beside the base template for an external compositor.

use pulse_model::{PulseError, PulseResult, VibeProfile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VibeCard {
    pub username: String,
    pub persona_label: String,
    /// Display label -> formatted value.
    pub stats: BTreeMap<String, String>,
    pub palette: Vec<String>,
}

impl VibeCard {
    pub fn from_profile(profile: &VibeProfile) -> Self {
        let mut stats = BTreeMap::new();
        stats.insert("Persona".to_string(), profile.persona_label.clone());
        for (key, value) in profile.behavioral_metrics.iter().chain(&profile.purchase_metrics) {
            stats.insert(title_case(key), format_stat(*value));
        }
        stats.insert("Colors".to_string(), profile.color_palette.join(", "));
        Self {
            username: profile.customer_id.clone(),
            persona_label: profile.persona_label.clone(),
            stats,
            palette: profile.color_palette.clone(),
        }
    }
}

/// `days_since_purchase` -> `Days Since Purchase`
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_stat(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

pub trait VibeCardRenderer: Send + Sync {
    /// Produce a shareable artifact for `card` and return its path.
    fn render(&self, card: &VibeCard) -> PulseResult<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct ManifestCardRenderer {
    template: PathBuf,
}

#[derive(Serialize)]
struct Manifest<'a> {
    template: &'a Path,
    title: String,
    subtitle: String,
    lines: Vec<String>,
    card: &'a VibeCard,
}

impl ManifestCardRenderer {
    pub fn new(template: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
        }
    }

    fn manifest_path(&self, username: &str) -> PathBuf {
        let stem = self
            .template
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("vibe_card");
        let safe: String = username
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.template.with_file_name(format!("{stem}_{safe}.json"))
    }
}

impl VibeCardRenderer for ManifestCardRenderer {
    fn render(&self, card: &VibeCard) -> PulseResult<PathBuf> {
        if !self.template.is_file() {
            return Err(PulseError::DataUnavailable(format!(
                "vibe card template not found at {}",
                self.template.display()
            )));
        }
        let manifest = Manifest {
            template: &self.template,
            title: format!("@{}'s Optic Pulse", card.username),
            subtitle: format!("Vibe: {}", card.persona_label),
            lines: card.stats.iter().map(|(k, v)| format!("{k}: {v}")).collect(),
            card,
        };
        let path = self.manifest_path(&card.username);
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PulseError::Source(format!("failed to encode card manifest: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| PulseError::Source(format!("failed to write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "vibe card manifest written");
        Ok(path)
    }
}
