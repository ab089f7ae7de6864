//! Words → digits (C8). Grounded on the vendored `text_to_num` library
//! referenced from `text_processor.py` — specifically `parsers.py`'s
//! `is_coef_appliable` rule ("a multiplier applies to the current group, or
//! to the total if it exceeds the group") and the English/German language
//! tables in `lang/english.py`/`lang/german.py`.
//!
//! English is parsed as a token stream with one-token look-ahead. German
//! numbers are written as a single agglutinated word, so they are first
//! greedily segmented against the vocabulary (longest match first) and then
//! parsed the same way, re-parsing cumulatively until a segment boundary
//! fails to extend the current number (one step of look-ahead handles
//! "...und..." composites).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    English,
    German,
}

impl Lang {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Lang::English),
            "de" => Some(Lang::German),
            _ => None,
        }
    }
}

struct NumberTable {
    units: HashMap<&'static str, u64>,
    teens: HashMap<&'static str, u64>,
    tens: HashMap<&'static str, u64>,
    hundred: HashMap<&'static str, u64>,
    multipliers: HashMap<&'static str, u64>,
    decimal_word: &'static str,
    zero_words: &'static [&'static str],
}

fn english_table() -> NumberTable {
    let units = HashMap::from([
        ("one", 1), ("two", 2), ("three", 3), ("four", 4), ("five", 5),
        ("six", 6), ("seven", 7), ("eight", 8), ("nine", 9),
    ]);
    let teens = HashMap::from([
        ("ten", 10), ("eleven", 11), ("twelve", 12), ("thirteen", 13),
        ("fourteen", 14), ("fifteen", 15), ("sixteen", 16), ("seventeen", 17),
        ("eighteen", 18), ("nineteen", 19),
    ]);
    let tens = HashMap::from([
        ("twenty", 20), ("thirty", 30), ("forty", 40), ("fifty", 50),
        ("sixty", 60), ("seventy", 70), ("eighty", 80), ("ninety", 90),
    ]);
    let hundred = HashMap::from([("hundred", 100)]);
    let multipliers = HashMap::from([
        ("thousand", 1_000),
        ("million", 1_000_000),
        ("billion", 1_000_000_000),
    ]);
    NumberTable {
        units,
        teens,
        tens,
        hundred,
        multipliers,
        decimal_word: "point",
        zero_words: &["zero"],
    }
}

fn german_table() -> NumberTable {
    let units = HashMap::from([
        ("eins", 1), ("ein", 1), ("eine", 1), ("zwei", 2), ("drei", 3),
        ("vier", 4), ("fünf", 5), ("sechs", 6), ("sieben", 7), ("acht", 8),
        ("neun", 9),
    ]);
    let teens = HashMap::from([
        ("zehn", 10), ("elf", 11), ("zwölf", 12), ("dreizehn", 13),
        ("vierzehn", 14), ("fünfzehn", 15), ("sechzehn", 16),
        ("siebzehn", 17), ("achtzehn", 18), ("neunzehn", 19),
    ]);
    let tens = HashMap::from([
        ("zwanzig", 20), ("dreißig", 30), ("vierzig", 40), ("fünfzig", 50),
        ("sechzig", 60), ("siebzig", 70), ("achtzig", 80), ("neunzig", 90),
    ]);
    let hundred = HashMap::from([("hundert", 100)]);
    let multipliers = HashMap::from([
        ("tausend", 1_000),
        ("million", 1_000_000),
        ("millionen", 1_000_000),
        ("milliarde", 1_000_000_000),
        ("milliarden", 1_000_000_000),
    ]);
    NumberTable {
        units,
        teens,
        tens,
        hundred,
        multipliers,
        decimal_word: "komma",
        zero_words: &["null"],
    }
}

fn table_for(lang: Lang) -> NumberTable {
    match lang {
        Lang::English => english_table(),
        Lang::German => german_table(),
    }
}

/// Looks up a single word against `table` without needing a live [`Parser`].
/// Shared by `Parser::word_kind_and_value` and the token-sequence feeder that
/// has to peek ahead at raw words before deciding how to feed them.
fn lookup_kind_value(table: &NumberTable, word: &str) -> Option<(Kind, u64)> {
    if let Some(&v) = table.units.get(word) {
        return Some((Kind::Unit, v));
    }
    if let Some(&v) = table.teens.get(word) {
        return Some((Kind::Teen, v));
    }
    if let Some(&v) = table.tens.get(word) {
        return Some((Kind::Ten, v));
    }
    if let Some(&v) = table.hundred.get(word) {
        return Some((Kind::Hundred, v));
    }
    if let Some(&v) = table.multipliers.get(word) {
        return Some((Kind::Multiplier, v));
    }
    if table.zero_words.contains(&word) {
        return Some((Kind::Zero, 0));
    }
    None
}

/// A single digit word (0-9), the only kind of word the fraction sub-parser
/// accepts: "eins"/"one" -> 1, "null"/"zero" -> 0. Teens, tens, hundreds and
/// multipliers are never digits, so they fall through and end the run.
fn single_digit_value(table: &NumberTable, word: &str) -> Option<u64> {
    if let Some(&v) = table.units.get(word) {
        return Some(v);
    }
    if table.zero_words.contains(&word) {
        return Some(0);
    }
    None
}

/// Ordinal word tables. Grounded on `lang/english.py`/`lang/german.py`'s
/// `ORDINALS` maps, restricted to the single-token ordinals the streaming
/// tokenizer can actually see (compounds like "twenty-first" arrive as one
/// hyphenated token and are left untouched, matching the vendored library's
/// own `TOKEN_PATTERN` boundary).
fn english_ordinals() -> HashMap<&'static str, u64> {
    HashMap::from([
        ("first", 1), ("second", 2), ("third", 3), ("fourth", 4), ("fifth", 5),
        ("sixth", 6), ("seventh", 7), ("eighth", 8), ("ninth", 9), ("tenth", 10),
        ("eleventh", 11), ("twelfth", 12), ("thirteenth", 13), ("fourteenth", 14),
        ("fifteenth", 15), ("sixteenth", 16), ("seventeenth", 17), ("eighteenth", 18),
        ("nineteenth", 19), ("twentieth", 20), ("thirtieth", 30), ("fortieth", 40),
        ("fiftieth", 50), ("sixtieth", 60), ("seventieth", 70), ("eightieth", 80),
        ("ninetieth", 90), ("hundredth", 100), ("thousandth", 1_000),
    ])
}

fn german_ordinals() -> HashMap<&'static str, u64> {
    HashMap::from([
        ("erste", 1), ("zweite", 2), ("dritte", 3), ("vierte", 4), ("fünfte", 5),
        ("sechste", 6), ("siebte", 7), ("achte", 8), ("neunte", 9), ("zehnte", 10),
        ("elfte", 11), ("zwölfte", 12), ("dreizehnte", 13), ("vierzehnte", 14),
        ("fünfzehnte", 15), ("sechzehnte", 16), ("siebzehnte", 17), ("achtzehnte", 18),
        ("neunzehnte", 19), ("zwanzigste", 20), ("dreißigste", 30), ("vierzigste", 40),
        ("fünfzigste", 50), ("sechzigste", 60), ("siebzigste", 70), ("achtzigste", 80),
        ("neunzigste", 90), ("hundertste", 100), ("tausendste", 1_000),
    ])
}

fn ordinals_for(lang: Lang) -> HashMap<&'static str, u64> {
    match lang {
        Lang::English => english_ordinals(),
        Lang::German => german_ordinals(),
    }
}

/// "eleventh"/"twelfth"/"thirteenth" (and their hundred/thousand multiples)
/// take "th" regardless of the last digit; everything else follows the
/// usual 1/2/3 -> st/nd/rd rule.
fn english_ordinal_suffix(n: u64) -> &'static str {
    let last_two = n % 100;
    if (11..=13).contains(&last_two) {
        return "th";
    }
    match n % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Renders an ordinal value the way the target language writes a digit
/// ordinal: "3rd" in English, "3." in German.
fn format_ordinal(lang: Lang, value: u64) -> String {
    match lang {
        Lang::English => format!("{value}{}", english_ordinal_suffix(value)),
        Lang::German => format!("{value}."),
    }
}

/// Default `ordinal_threshold` (§4.8): 0 means "always convert". A caller
/// wanting to leave small ordinals as words (e.g. "the first one" should
/// stay prose while "the 42nd caller" converts) passes a higher threshold
/// via [`process_with_ordinal_threshold`].
pub const DEFAULT_ORDINAL_THRESHOLD: u64 = 0;

/// `is_coef_appliable` from `parsers.py`: a multiplier either folds into the
/// current three-digit group, or (if it already exceeds the group, or the
/// group is empty and the multiplier is exactly "thousand") is promoted to
/// apply to the running total instead.
fn is_coef_appliable(coef: u64, group_value: u64) -> bool {
    if coef > group_value && (group_value > 0 || coef == 1_000) {
        return true; // applies to the total
    }
    coef.saturating_mul(coef) <= group_value.max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unit,
    Teen,
    Ten,
    Hundred,
    Multiplier,
    Zero,
}

/// Whether a number word of kind `next` can extend a number whose most
/// recent word was of kind `prev`, versus having to close off the previous
/// number and start a fresh one. Grounded on the grammar enforced by
/// `text_to_num`'s token-stream parser (a `Ten` only ever precedes a `Unit`,
/// a `Hundred` only ever precedes a smaller group, and so on) rather than
/// naively summing any two adjacent number words.
fn continues(prev: Kind, next: Kind) -> bool {
    use Kind::*;
    match (prev, next) {
        (_, Multiplier) => true,
        (Ten, Unit) => true,
        (Hundred, Unit) | (Hundred, Teen) | (Hundred, Ten) => true,
        (Teen, Hundred) => true,
        (Unit, Hundred) | (Ten, Hundred) => true,
        (Multiplier, Hundred) | (Multiplier, Ten) | (Multiplier, Teen) | (Multiplier, Unit) => {
            true
        }
        _ => false,
    }
}

enum FeedResult {
    /// Not a recognized number word at all.
    NotNumber,
    /// Consumed into the number already in progress.
    Extended,
    /// A number word, but it cannot continue what's in progress; the caller
    /// must flush the previous number, then feed this word again into a
    /// fresh parser state.
    StartsNew,
}

struct Parser {
    table: NumberTable,
    total: u64,
    group: u64,
    in_number: bool,
    last_kind: Option<Kind>,
}

impl Parser {
    fn new(table: NumberTable) -> Self {
        Self {
            table,
            total: 0,
            group: 0,
            in_number: false,
            last_kind: None,
        }
    }

    fn word_kind_and_value(&self, word: &str) -> Option<(Kind, u64)> {
        lookup_kind_value(&self.table, word)
    }

    /// Applies `word` unconditionally, assuming any transition check already
    /// passed (or this is the first word of a fresh number).
    fn apply(&mut self, kind: Kind, value: u64) {
        match kind {
            Kind::Unit | Kind::Teen | Kind::Ten => self.group += value,
            Kind::Hundred => {
                self.group = if self.group == 0 { value } else { self.group * value }
            }
            Kind::Multiplier => {
                if is_coef_appliable(value, self.group) && value > self.group {
                    self.total += self.group.max(1) * value;
                } else {
                    self.total += self.group * value;
                }
                self.group = 0;
            }
            Kind::Zero => {
                self.total = 0;
                self.group = 0;
            }
        }
        self.in_number = true;
        self.last_kind = Some(kind);
    }

    fn feed(&mut self, word: &str) -> FeedResult {
        let Some((kind, value)) = self.word_kind_and_value(word) else {
            return FeedResult::NotNumber;
        };
        self.feed_value(kind, value)
    }

    /// As `feed`, but for a `(kind, value)` pair already resolved by the
    /// caller — used for the "und"-composite value synthesized from a
    /// unit+ten pair, which has no single word of its own to look up.
    fn feed_value(&mut self, kind: Kind, value: u64) -> FeedResult {
        match self.last_kind {
            Some(prev) if continues(prev, kind) => {
                self.apply(kind, value);
                FeedResult::Extended
            }
            Some(_) => FeedResult::StartsNew,
            None => {
                self.apply(kind, value);
                FeedResult::Extended
            }
        }
    }

    fn flush(&mut self) -> Option<u64> {
        if !self.in_number {
            return None;
        }
        let value = self.total + self.group;
        self.total = 0;
        self.group = 0;
        self.in_number = false;
        self.last_kind = None;
        Some(value)
    }
}

/// German number words are written as one agglutinated token. This greedily
/// splits `word` against the known vocabulary, trying the longest known
/// suffix/prefix first, mirroring `ALL_WORDS_SORTED_REVERSE` in
/// `lang/german.py`.
fn segment_german_word<'a>(word: &'a str, table: &NumberTable) -> Vec<&'a str> {
    let mut vocab: Vec<&str> = table
        .units
        .keys()
        .chain(table.teens.keys())
        .chain(table.tens.keys())
        .chain(table.hundred.keys())
        .chain(table.multipliers.keys())
        .copied()
        .chain(std::iter::once("und"))
        .collect();
    vocab.sort_by_key(|w| std::cmp::Reverse(w.len()));

    let mut segments = Vec::new();
    let mut rest = word;
    'outer: while !rest.is_empty() {
        for candidate in &vocab {
            if rest.starts_with(candidate) {
                segments.push(&rest[..candidate.len()]);
                rest = &rest[candidate.len()..];
                continue 'outer;
            }
        }
        // No known prefix matched; bail out and treat the remainder as
        // unparseable rather than looping forever.
        return Vec::new();
    }
    segments
}

/// Feeds one number-word token into `parser`, flushing the in-progress
/// number to `out` first if this token can't extend it. Returns whether the
/// token was recognized as a number word at all.
fn feed_one(parser: &mut Parser, out: &mut Vec<String>, word: &str) -> bool {
    match parser.feed(word) {
        FeedResult::NotNumber => false,
        FeedResult::Extended => true,
        FeedResult::StartsNew => {
            if let Some(v) = parser.flush() {
                out.push(v.to_string());
            }
            matches!(parser.feed(word), FeedResult::Extended)
        }
    }
}

/// As `feed_one`, but for a `(kind, value)` pair that already has no word of
/// its own (the "und" composite below).
fn feed_kind_value(parser: &mut Parser, out: &mut Vec<String>, kind: Kind, value: u64) {
    if let FeedResult::StartsNew = parser.feed_value(kind, value) {
        if let Some(v) = parser.flush() {
            out.push(v.to_string());
        }
        parser.feed_value(kind, value);
    }
}

/// Feeds a sequence of already-tokenized number words into `parser`,
/// collapsing German "und" composites (`einundzwanzig` = `ein` + `und` +
/// `zwanzig` = 1 + 20 = 21) into a single combined value first. Grounded on
/// `text_to_num/lang/parsers.py`'s `relaxed=True` handling of `und`: the
/// connector sums the unit that precedes it with the ten that follows it,
/// rather than letting the ordinary `Unit -> Ten` transition (which is
/// invalid grammar on its own — a ten never follows a unit) reject the
/// sequence. Used both for a single agglutinated German word split by
/// `segment_german_word` and for already-space-separated tokens like
/// "ein und zwanzig".
fn feed_token_sequence(parser: &mut Parser, out: &mut Vec<String>, table: &NumberTable, tokens: &[&str]) {
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];

        if let Some(&unit_val) = table.units.get(tok) {
            if i + 2 < tokens.len() && tokens[i + 1] == "und" {
                if let Some(&ten_val) = table.tens.get(tokens[i + 2]) {
                    feed_kind_value(parser, out, Kind::Ten, unit_val + ten_val);
                    i += 3;
                    continue;
                }
            }
        }

        if tok == "und" {
            // A stray connector with no unit+ten composite around it (e.g.
            // at a sentence boundary); drop it rather than feeding it as a
            // literal, matching its role as pure glue in German grammar.
            i += 1;
            continue;
        }

        feed_one(parser, out, tok);
        i += 1;
    }
}

fn process_tokens(lang: Lang, text: &str, ordinal_threshold: u64) -> String {
    let table = table_for(lang);
    let ordinals = ordinals_for(lang);
    let mut parser = Parser::new(table_for(lang));
    let mut out = Vec::new();
    let decimal_word = table.decimal_word;

    // Fraction sub-parser state (§4.8: "a decimal separator word switches to
    // a fraction sub-parser"). Holds the already-flushed integer part plus
    // the digit string accumulated since the separator; each following
    // single-digit word is a literal digit, not a cardinal to sum, so
    // "three point one four" -> "3.14", not "3 . 1 4".
    let mut fraction: Option<(String, String)> = None;

    for raw in text.split_whitespace() {
        let lower = raw.to_lowercase();
        let word = lower.trim_matches(|c: char| c == ',' || c == '.');

        if word == decimal_word {
            if let Some((integer_part, digits)) = fraction.take() {
                out.push(format!("{integer_part}.{digits}"));
            }
            let integer_part = parser
                .flush()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "0".to_string());
            fraction = Some((integer_part, String::new()));
            continue;
        }

        if let Some((_, digits)) = fraction.as_mut() {
            if let Some(digit) = single_digit_value(&table, word) {
                digits.push_str(&digit.to_string());
                continue;
            }
            // A non-digit token ends the fraction run; flush it before
            // falling through to ordinary handling for this same token.
            let (integer_part, digits) = fraction.take().unwrap();
            out.push(format!("{integer_part}.{digits}"));
        }

        // Ordinals are standalone tokens in this tokenizer (no hyphenated
        // compounds), so they never extend a cardinal run in progress:
        // flush whatever cardinal the parser was building first.
        if let Some(&value) = ordinals.get(word) {
            if value >= ordinal_threshold {
                if let Some(v) = parser.flush() {
                    out.push(v.to_string());
                }
                out.push(format_ordinal(lang, value));
                continue;
            }
        }

        // Resolve this raw token to a sequence of vocabulary words before
        // feeding it: either itself directly, or (German only) the result
        // of greedily segmenting an agglutinated compound. Both paths are
        // fed through the same `feed_token_sequence`, so a space-separated
        // "ein und zwanzig" and an agglutinated "einundzwanzig" resolve to
        // the same 21 instead of only one of them merging the "und".
        let sub_tokens: Option<Vec<&str>> = if lookup_kind_value(&table, word).is_some() {
            Some(vec![word])
        } else if lang == Lang::German {
            let segments = segment_german_word(word, &parser.table);
            if segments.is_empty() {
                None
            } else {
                Some(segments)
            }
        } else {
            None
        };

        match sub_tokens {
            Some(tokens) => feed_token_sequence(&mut parser, &mut out, &table, &tokens),
            None => {
                if let Some(v) = parser.flush() {
                    out.push(v.to_string());
                }
                out.push(raw.to_string());
            }
        }
    }

    if let Some((integer_part, digits)) = fraction.take() {
        out.push(format!("{integer_part}.{digits}"));
    }
    if let Some(v) = parser.flush() {
        out.push(v.to_string());
    }

    out.join(" ")
}

/// Applies words-to-digits normalization for `lang` with the default
/// `ordinal_threshold` (0, "always convert"). Unsupported languages are
/// returned unchanged. Idempotent: digit tokens (including rendered
/// ordinals like "3rd"/"3.") are never recognized as number words, so a
/// second pass is always a no-op.
pub fn process(text: &str, lang_code: &str) -> String {
    process_with_ordinal_threshold(text, lang_code, DEFAULT_ORDINAL_THRESHOLD)
}

/// As [`process`], but ordinals below `ordinal_threshold` are left as words
/// instead of being converted to digits (§4.8).
pub fn process_with_ordinal_threshold(text: &str, lang_code: &str, ordinal_threshold: u64) -> String {
    match Lang::from_code(lang_code) {
        Some(lang) => process_tokens(lang, text, ordinal_threshold),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_english_numbers() {
        assert_eq!(process("one two three", "en"), "1 2 3");
    }

    #[test]
    fn converts_english_hundreds_and_thousands() {
        assert_eq!(process("one thousand two hundred", "en"), "1200");
    }

    #[test]
    fn converts_english_ordinals_with_correct_suffix() {
        assert_eq!(process("the third caller", "en"), "the 3rd caller");
        assert_eq!(process("the eleventh caller", "en"), "the 11th caller");
        assert_eq!(process("the twentieth caller", "en"), "the 20th caller");
    }

    #[test]
    fn converts_german_ordinals_with_dot_suffix() {
        assert_eq!(process("der dritte Anrufer", "de"), "der 3. Anrufer");
    }

    #[test]
    fn ordinal_threshold_leaves_small_ordinals_as_words() {
        let out = process_with_ordinal_threshold("the third caller", "en", 10);
        assert_eq!(out, "the third caller");
    }

    #[test]
    fn ordinal_output_is_idempotent() {
        let once = process("the third caller", "en");
        let twice = process(&once, "en");
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_non_number_words_untouched() {
        assert_eq!(process("hello world", "en"), "hello world");
    }

    #[test]
    fn is_idempotent_on_already_digit_text() {
        let once = process("twenty one apples", "en");
        let twice = process(&once, "en");
        assert_eq!(once, twice);
    }

    #[test]
    fn unsupported_language_is_a_no_op() {
        assert_eq!(process("un deux trois", "fr"), "un deux trois");
    }

    #[test]
    fn converts_german_und_composites() {
        assert_eq!(process("einundzwanzig", "de"), "21");
        assert_eq!(process("fünfundzwanzig", "de"), "25");
        assert_eq!(process("ein und zwanzig", "de"), "21");
    }

    #[test]
    fn converts_german_und_composite_inside_hundreds() {
        assert_eq!(process("hundertfünfundzwanzig", "de"), "125");
    }

    #[test]
    fn converts_english_decimal_to_single_fractional_token() {
        assert_eq!(process("three point one four", "en"), "3.14");
    }

    #[test]
    fn converts_german_decimal_to_single_fractional_token() {
        assert_eq!(process("drei komma eins vier", "de"), "3.14");
    }

    #[test]
    fn decimal_with_no_leading_integer_defaults_to_zero() {
        assert_eq!(process("point five", "en"), "0.5");
    }
}
