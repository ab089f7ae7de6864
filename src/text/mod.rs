//! Text Post-Processors (C8): applied to final transcripts only, after
//! engine-native finalization, when the session's `optimize_final_result`
//! option is set. Grounded on `text_processor.py`'s `TextProcessor.process`
//! (words-to-digits, then date/time normalization, in that order).

pub mod datetime;
pub mod words_to_digits;

/// Runs both post-processing passes for `lang_code` over `text`. A failure
/// in either pass is not possible here (both are infallible `String -> String`
/// transforms); an unsupported language is simply a no-op in each.
pub fn optimize_final_result(text: &str, lang_code: &str) -> String {
    let with_digits = words_to_digits::process(text, lang_code);
    datetime::normalize(&with_digits, lang_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_words_to_digits_then_datetime() {
        let out = optimize_final_result("we will call one hundred clients", "en");
        assert_eq!(out, "we will call 100 clients");
    }

    #[test]
    fn unsupported_language_passes_through() {
        assert_eq!(optimize_final_result("bonjour neuf heures", "fr"), "bonjour neuf heures");
    }

    #[test]
    fn german_scenario_from_the_wire_spec() {
        // "zwölf Uhr dreißig am Samstag" -> "12:30 Uhr am Samstag"
        let out = optimize_final_result("zwölf Uhr dreißig am Samstag", "de");
        assert_eq!(out, "12:30 Uhr am Samstag");
    }
}
