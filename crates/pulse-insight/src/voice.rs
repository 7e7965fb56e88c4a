//! Voice profiling over a brand's recent campaign texts.

use pulse_model::request::MAX_CAMPAIGN_TEXTS;
use pulse_model::{BodyPatterns, CampaignText, CtaStyle, OutcomeCounts, Outcome, Tone, VoiceProfile};
use regex::Regex;
use std::sync::OnceLock;

/// Prior used when a brand has no campaign history.
pub const NEUTRAL_PRIOR: f64 = 50.0;
pub const PLAYFUL_EMOJI_DENSITY: f64 = 0.08;
pub const CASUAL_SENTENCE_TOKENS: f64 = 12.0;

struct CtaRule {
    style: CtaStyle,
    pattern: &'static str,
}

const CTA_RULES: &[CtaRule] = &[
    CtaRule {
        style: CtaStyle::Urgency,
        pattern: r"(?i)\b(limited time|hurry|last chance|ends tonight|while stocks last|don't miss|flash sale)\b",
    },
    CtaRule {
        style: CtaStyle::DiscountLed,
        pattern: r"(?i)(%\s?off\b|\buse code\b|\bcoupon|\bsave\b)",
    },
    CtaRule {
        style: CtaStyle::Imperative,
        pattern: r"(?i)\b(shop now|click|explore|discover|buy|grab|treat yourself)\b",
    },
];

fn cta_patterns() -> &'static [(CtaStyle, Regex)] {
    static PATTERNS: OnceLock<Vec<(CtaStyle, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CTA_RULES
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (rule.style, re)))
            .collect()
    })
}

fn hashtag() -> &'static Option<Regex> {
    static HASHTAG: OnceLock<Option<Regex>> = OnceLock::new();
    HASHTAG.get_or_init(|| Regex::new(r"#\w+").ok())
}

/// CTA style of one body: the first rule that matches, else soft.
pub fn cta_style(body: &str) -> CtaStyle {
    cta_patterns()
        .iter()
        .find(|(_, re)| re.is_match(body))
        .map(|(style, _)| *style)
        .unwrap_or(CtaStyle::Soft)
}

pub fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B50 | 0x2B55 | 0x2190..=0x21FF | 0x3030 | 0x303D
    )
}

fn sentence_count(body: &str) -> usize {
    body.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1)
}

/// Sample the ten most recent texts: `sent_at` descending, then id ascending.
pub fn sample(texts: &[CampaignText]) -> Vec<&CampaignText> {
    let mut sample: Vec<&CampaignText> = texts.iter().collect();
    sample.sort_by(|a, b| {
        b.sent_at
            .cmp(&a.sent_at)
            .then_with(|| a.campaign_id.cmp(&b.campaign_id))
    });
    sample.truncate(MAX_CAMPAIGN_TEXTS);
    sample
}

/// Outcome-weighted prior on the 0–100 scale.
pub fn success_prior(outcomes: &OutcomeCounts) -> f64 {
    let k = outcomes.total();
    if k == 0 {
        return NEUTRAL_PRIOR;
    }
    let points = outcomes.read * Outcome::Read.half_points() + outcomes.sent * Outcome::Sent.half_points();
    (points * 50) as f64 / k as f64
}

pub fn profile(brand_id: &str, texts: &[CampaignText]) -> VoiceProfile {
    let sample = sample(texts);
    let k = sample.len();

    let mut outcomes = OutcomeCounts::default();
    let mut tokens = 0usize;
    let mut emojis = 0usize;
    let mut sentences = 0usize;
    let mut exclaiming = 0usize;
    let mut hashtagged = 0usize;
    let mut offers = 0usize;
    let mut cta_votes = [0usize; 4];

    for text in &sample {
        let body = text.body.as_str();
        match text.outcome {
            Outcome::Read => outcomes.read += 1,
            Outcome::Sent => outcomes.sent += 1,
            Outcome::Unsent => outcomes.unsent += 1,
        }
        tokens += body.split_whitespace().count();
        emojis += body.chars().filter(|c| is_emoji(*c)).count();
        sentences += sentence_count(body);
        if body.contains('!') {
            exclaiming += 1;
        }
        if hashtag().as_ref().is_some_and(|re| re.is_match(body)) {
            hashtagged += 1;
        }
        let style = cta_style(body);
        if style == CtaStyle::DiscountLed {
            offers += 1;
        }
        cta_votes[style as usize] += 1;
    }

    let share = |n: usize| if k == 0 { 0.0 } else { n as f64 / k as f64 };
    let emoji_density = if tokens == 0 { 0.0 } else { emojis as f64 / tokens as f64 };
    let patterns = BodyPatterns {
        avg_tokens: share(tokens),
        exclamation_rate: share(exclaiming),
        hashtag_rate: share(hashtagged),
        offer_rate: share(offers),
    };

    // Most votes wins; the strict comparison keeps table order on ties.
    let styles = [CtaStyle::Urgency, CtaStyle::DiscountLed, CtaStyle::Imperative, CtaStyle::Soft];
    let mut cta = CtaStyle::Soft;
    let mut best = 0usize;
    for style in styles {
        if cta_votes[style as usize] > best {
            best = cta_votes[style as usize];
            cta = style;
        }
    }

    let avg_sentence = if sentences == 0 { 0.0 } else { tokens as f64 / sentences as f64 };
    let tone = if k == 0 {
        Tone::Neutral
    } else if cta == CtaStyle::Urgency && patterns.exclamation_rate >= 0.5 {
        Tone::Urgent
    } else if emoji_density >= PLAYFUL_EMOJI_DENSITY {
        Tone::Playful
    } else if patterns.exclamation_rate >= 0.5 || avg_sentence < CASUAL_SENTENCE_TOKENS {
        Tone::Casual
    } else {
        Tone::Formal
    };

    let mut ranked = sample.clone();
    // Stable: recency order survives within an outcome class.
    ranked.sort_by(|a, b| b.outcome.half_points().cmp(&a.outcome.half_points()));
    let exemplars = ranked
        .iter()
        .map(|t| t.body.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();

    VoiceProfile {
        brand_id: brand_id.to_string(),
        sample_size: k,
        tone,
        emoji_density,
        cta_style: cta,
        exemplars,
        patterns,
        outcomes,
        success_prior: success_prior(&outcomes),
    }
}
