//! Date/time normalization (C8). Grounded on `text_processor.py`'s
//! `optimize_time_de`/`optimize_date_de`/`optimize_time_en`/`optimize_date_en`
//! regex passes.
//!
//! `optimize_time_en` in the original recurses into the German time rule on
//! its second pass (an apparent copy-paste bug). Here both English passes
//! use the English rule; see `DESIGN.md` for the Open Question record.
//! `optimize_date_en` is a no-op in the original and stays a no-op here.

use once_cell::sync::Lazy;
use regex::Regex;

static DE_HOUR_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bein\s+Uhr\b").unwrap());
static DE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\s+Uhr\s+(\d{1,2})\b").unwrap());
static DE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\.\s*(\d{1,2})\.(?:\s*(\d{4}))?").unwrap());

static EN_HOUR_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bone\s+(am|pm|o'clock)\b").unwrap());
static EN_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+(\d{1,2})\s+(am|pm|o'clock)\b").unwrap()
});

/// Applies the date/time normalization pass for `lang_code`. Unsupported
/// languages are returned unchanged.
pub fn normalize(text: &str, lang_code: &str) -> String {
    match lang_code {
        "de" => optimize_date_de(&optimize_time_de(text)),
        "en" => optimize_date_en(&optimize_time_en(text)),
        _ => text.to_string(),
    }
}

fn optimize_time_de(text: &str) -> String {
    let text = DE_HOUR_PREFIX.replace_all(text, "1 Uhr");
    DE_TIME
        .replace_all(&text, |caps: &regex::Captures| {
            let hour: u32 = caps[1].parse().unwrap_or(25);
            let minute: u32 = caps[2].parse().unwrap_or(60);
            if hour <= 24 && minute <= 59 {
                format!("{hour}:{minute:02} Uhr")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn optimize_date_de(text: &str) -> String {
    DE_DATE
        .replace_all(text, |caps: &regex::Captures| {
            let day: u32 = caps[1].parse().unwrap_or(32);
            let month: u32 = caps[2].parse().unwrap_or(13);
            if day <= 31 && month <= 12 {
                match caps.get(3) {
                    Some(year) => format!("{day:02}.{month:02}.{}", year.as_str()),
                    None => format!("{day:02}.{month:02}."),
                }
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn optimize_time_en(text: &str) -> String {
    let text = EN_HOUR_PREFIX.replace_all(text, "1 $1");
    EN_TIME
        .replace_all(&text, |caps: &regex::Captures| {
            let hour: u32 = caps[1].parse().unwrap_or(25);
            let minute: u32 = caps[2].parse().unwrap_or(60);
            let suffix = &caps[3];
            if hour <= 24 && minute <= 59 {
                format!("{hour}:{minute:02} {suffix}")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn optimize_date_en(text: &str) -> String {
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_german_time() {
        assert_eq!(normalize("es ist 14 Uhr 5", "de"), "es ist 14:05 Uhr");
    }

    #[test]
    fn rewrites_german_standalone_one_oclock() {
        assert_eq!(normalize("treffen wir uns ein Uhr 30", "de"), "treffen wir uns 1:30 Uhr");
    }

    #[test]
    fn leaves_invalid_german_time_untouched() {
        assert_eq!(normalize("25 Uhr 5 ist ungueltig", "de"), "25 Uhr 5 ist ungueltig");
    }

    #[test]
    fn normalizes_german_date() {
        assert_eq!(normalize("am 3. 4. 2024 treffen", "de"), "am 03.04.2024 treffen");
    }

    #[test]
    fn normalizes_english_time() {
        assert_eq!(normalize("it is 9 5 am sharp", "en"), "it is 9:05 am sharp");
    }

    #[test]
    fn rewrites_english_standalone_one_oclock() {
        assert_eq!(normalize("see you one pm", "en"), "see you 1 pm");
    }

    #[test]
    fn leaves_english_date_untouched() {
        assert_eq!(normalize("on 3/4/2024", "en"), "on 3/4/2024");
    }

    #[test]
    fn unsupported_language_is_a_no_op() {
        assert_eq!(normalize("il est 14 heures", "fr"), "il est 14 heures");
    }
}
