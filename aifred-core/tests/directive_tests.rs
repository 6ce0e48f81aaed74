use aifred_core::{DirectiveSet, ProviderId, parse, summarise};
use parameterized::*;

const CORPUS: &[&str] = &[
    "",
    "   plain   text\twith\n whitespace  ",
    "Summarise this @gpt-4o @temp:0.5",
    r#"@sys:"You are   terse." explain @tools:browse,,code @max:300"#,
    "@new @name:brief start a brief",
    "@cont",
    "keep @unknown and @temp:warm and @provider:acme",
    "email alice@example.com and @claude-3-7-sonnet",
    "@pplx:recency=week,depth=high @sonar headlines",
    "x @new@cont y",
    r#"@foo:"quoted @temp:0.3 inside" stays"#,
    "@model:my-finetune @provider:openrouter @pplx_domain:law.cornell.edu go",
];

#[parameterized(
    text = {
        "hello world",
        "  spaced   out\ttext\n",
        "no directives, just punctuation: a@b c",
        "",
    },
    cleaned = {
        "hello world",
        "spaced out text",
        "no directives, just punctuation: a@b c",
        "",
    }
)]
fn test_text_without_directives_is_only_normalised(text: &str, cleaned: &str) {
    let (out, directives) = parse(text);
    assert_eq!(out, cleaned);
    assert!(directives.is_empty());
}

#[parameterized(
    raw = { "0.7", "0", "1.25", "-0.5", "2" },
    expected = { 0.7, 0.0, 1.25, -0.5, 2.0 }
)]
fn test_temperature_is_parsed_and_removed(raw: &str, expected: f64) {
    let token = format!("@temp:{}", raw);
    let (text, directives) = parse(&format!("before {} after", token));
    assert_eq!(directives.temperature, Some(expected));
    assert_eq!(text, "before after");
    assert!(!text.contains(&token));
}

#[test]
fn test_parse_is_idempotent_on_cleaned_text() {
    for raw in CORPUS {
        let (cleaned, _) = parse(raw);
        let (again, directives) = parse(&cleaned);
        assert_eq!(again, cleaned, "re-parse changed text of {:?}", raw);
        assert_eq!(directives, DirectiveSet::default(), "re-parse of {:?}", raw);
    }
}

#[test]
fn test_last_write_wins() {
    let (text, directives) = parse("@temp:0.2 plan @temp:0.7");
    assert_eq!(directives.temperature, Some(0.7));
    assert_eq!(text, "plan");

    let (_, directives) = parse("@gpt-4o @claude-3-7-sonnet @provider:gemini @provider:openai q");
    assert_eq!(directives.model.as_deref(), Some("claude-3-7-sonnet"));
    assert_eq!(directives.provider, Some(ProviderId::OpenAi));

    let (_, directives) = parse("@tools:browse q @tools:code,python");
    assert_eq!(directives.tool_names, vec!["code", "python"]);
}

#[test]
fn test_invalid_value_does_not_clear_earlier_value() {
    let (text, directives) = parse("@temp:0.3 q @temp:warm");
    assert_eq!(directives.temperature, Some(0.3));
    assert_eq!(text, "q @temp:warm");
}

#[test]
fn test_both_flags_can_be_set() {
    let (text, directives) = parse("@cont @new again");
    assert!(directives.continue_flag);
    assert!(directives.new_flag);
    assert_eq!(text, "again");
}

#[test]
fn test_quoted_values_keep_spaces() {
    let (text, directives) = parse(r#"@name:"Case notes 2024" @sys:"Cite  sources." go"#);
    assert_eq!(directives.thread_name.as_deref(), Some("Case notes 2024"));
    assert_eq!(directives.system_override.as_deref(), Some("Cite  sources."));
    assert_eq!(text, "go");
}

#[test]
fn test_summary() {
    let (_, directives) = parse("@gpt-4o @temp:0.4 @max:800 @tools:browse @provider:openai @new @cont");
    assert_eq!(
        summarise(&directives),
        "gpt-4o | temp 0.4 | max 800 | tools: browse | openai | new | cont"
    );
    assert_eq!(summarise(&DirectiveSet::default()), "defaults");
}
