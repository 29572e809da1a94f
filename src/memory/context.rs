//! Context assembly for system-prompt injection.
//!
//! Turns a raw [`MemoryBundle`] into a bounded [`MemoryContext`]. Assembly is pure:
//! the same bundle and config always produce the same context and the same text block.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let bundle = store.fetch_context(&kwami_id).await?;
//! let context = assemble(&bundle, &config);
//! let prompt = inject_into_prompt(BASE_PROMPT, &context, config.auto_inject_context);
//! ```

use serde::Serialize;

use super::types::{Entity, Fact, MemoryBundle, Turn};
use crate::config::MemoryConfig;

/// Most facts ever placed in a context.
pub const MAX_FACTS: usize = 20;

/// Most entities ever placed in a context.
pub const MAX_ENTITIES: usize = 10;

/// Per-turn text budget in bytes.
pub const MAX_TURN_BYTES: usize = 500;

/// Bounded memory projection for one session. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryContext {
    pub summary: Option<String>,
    /// Facts at or above the relevance floor, most relevant first
    pub facts: Vec<Fact>,
    pub entities: Vec<Entity>,
    /// Most recent turns, oldest first
    pub recent_turns: Vec<Turn>,
}

impl MemoryContext {
    /// Check if there's any memory context.
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.facts.is_empty()
            && self.entities.is_empty()
            && self.recent_turns.is_empty()
    }

    /// Format as a string for prompt injection.
    pub fn to_prompt_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut sections = Vec::new();

        if let Some(summary) = &self.summary {
            sections.push(format!("## Conversation Summary\n{}", summary));
        }

        if !self.facts.is_empty() {
            let facts = self
                .facts
                .iter()
                .map(format_fact)
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!(
                "## Known Facts About the Human User\n\
                 These facts are about the HUMAN you are talking to (NOT about you, the assistant).\n\
                 Facts marked as no longer valid describe the past.\n{}",
                facts
            ));
        }

        if !self.entities.is_empty() {
            let entities = self
                .entities
                .iter()
                .map(|e| {
                    if e.summary.is_empty() {
                        format!("- {} ({})", e.name, e.kind)
                    } else {
                        format!("- {} ({}): {}", e.name, e.kind, e.summary)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("## Relevant Entities\n{}", entities));
        }

        if !self.recent_turns.is_empty() {
            let turns = self
                .recent_turns
                .iter()
                .map(|t| format!("{}: {}", t.role, t.text))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("## Recent Conversation\n{}", turns));
        }

        sections.join("\n\n")
    }
}

/// Build a bounded context from a raw bundle.
pub fn assemble(bundle: &MemoryBundle, config: &MemoryConfig) -> MemoryContext {
    let facts = if config.include_facts {
        let mut facts = filter_facts(&bundle.facts, config.min_fact_relevance, &config.kwami_name);
        facts.truncate(MAX_FACTS);
        facts
    } else {
        Vec::new()
    };

    let entities = if config.include_entities {
        bundle
            .entities
            .iter()
            .take(MAX_ENTITIES)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    MemoryContext {
        summary: bundle
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        facts,
        entities,
        recent_turns: recent_turns(&bundle.history, config.max_context_messages),
    }
}

/// Keep facts at or above `min_relevance` that are about the user, most relevant first.
///
/// Shared by session-start assembly and mid-conversation recall.
pub fn filter_facts(facts: &[Fact], min_relevance: f64, kwami_name: &str) -> Vec<Fact> {
    let assistant = kwami_name.trim().to_lowercase();
    let mut kept: Vec<Fact> = facts
        .iter()
        .filter(|f| f.relevance >= min_relevance)
        .filter(|f| !f.text.trim().is_empty())
        .filter(|f| assistant.is_empty() || !is_assistant_fact(&f.text, &assistant))
        .cloned()
        .collect();
    // Stable, so equal scores keep their service order
    kept.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    kept
}

/// Check if a fact is about the assistant rather than the user.
///
/// The service extracts facts from both sides of the conversation; facts like
/// "Kwami is a voice assistant" must not be presented as user facts.
pub fn is_assistant_fact(fact: &str, assistant_name_lower: &str) -> bool {
    let fact_lower = fact.to_lowercase();

    if fact_lower.starts_with(&format!("{} ", assistant_name_lower)) {
        return true;
    }

    let name = assistant_name_lower;
    [
        format!("{} is", name),
        format!("{} was", name),
        format!("{} can", name),
        format!("name is {}", name),
        format!("called {}", name),
        format!("named {}", name),
        format!("i'm {}", name),
        format!("i am {}", name),
    ]
    .iter()
    .any(|phrase| fact_lower.contains(phrase.as_str()))
}

/// Append the memory section to a system prompt.
///
/// Returns `base_prompt` unchanged when injection is off or there is nothing to inject.
pub fn inject_into_prompt(base_prompt: &str, context: &MemoryContext, auto_inject: bool) -> String {
    if !auto_inject || context.is_empty() {
        return base_prompt.to_string();
    }

    format!(
        "{}\n\n# Memory Context\n\
         You have access to your persistent memory about past conversations. \
         Use this context to provide personalized, contextual responses.\n\n{}",
        base_prompt.trim_end(),
        context.to_prompt_block()
    )
}

/// Most recent `max` turns in chronological order, each within the text budget.
fn recent_turns(history: &[Turn], max: usize) -> Vec<Turn> {
    let mut ordered: Vec<&Turn> = history
        .iter()
        .filter(|t| !t.text.trim().is_empty())
        .collect();
    ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));

    let start = ordered.len().saturating_sub(max);
    ordered[start..]
        .iter()
        .map(|t| Turn {
            text: truncate_message(t.text.trim(), MAX_TURN_BYTES),
            ..(*t).clone()
        })
        .collect()
}

fn format_fact(fact: &Fact) -> String {
    match (fact.valid_at, fact.invalid_at) {
        (_, Some(until)) => format!(
            "- {} (no longer valid since {})",
            fact.text,
            until.format("%Y-%m-%d")
        ),
        (Some(since), None) => format!("- {} (since {})", fact.text, since.format("%Y-%m-%d")),
        (None, None) => format!("- {}", fact.text),
    }
}

/// Find a safe UTF-8 boundary for truncation.
/// Returns the byte index that is at or before `max_bytes` and on a char boundary.
pub fn safe_truncate_index(s: &str, max_bytes: usize) -> usize {
    if s.len() <= max_bytes {
        return s.len();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Truncate a message with an ellipsis, safe for UTF-8.
fn truncate_message(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        content.to_string()
    } else {
        let safe_end = safe_truncate_index(content, max_bytes);
        format!("{}...", &content[..safe_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use chrono::{TimeZone, Utc};

    fn config() -> MemoryConfig {
        MemoryConfig {
            min_fact_relevance: 0.5,
            max_context_messages: 3,
            ..Default::default()
        }
    }

    fn turn(seq: u64, text: &str) -> Turn {
        Turn {
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap(),
            ..Turn::new(seq, if seq % 2 == 0 { Role::User } else { Role::Agent }, text)
        }
    }

    /// Bundles with a spread of sizes and relevance scores.
    fn sample_bundles() -> Vec<MemoryBundle> {
        (0..12u64)
            .map(|n| MemoryBundle {
                summary: (n % 3 == 0).then(|| format!("summary {}", n)),
                facts: (0..n)
                    .map(|i| Fact::new(format!("fact {} {}", n, i), ((i * 37 + n * 11) % 101) as f64 / 100.0))
                    .collect(),
                entities: (0..n % 4)
                    .map(|i| Entity {
                        name: format!("e{}", i),
                        kind: "Thing".to_string(),
                        summary: String::new(),
                    })
                    .collect(),
                history: (0..n * 2).map(|i| turn(i, &format!("msg {}", i))).collect(),
            })
            .collect()
    }

    #[test]
    fn test_empty_bundle_gives_empty_context() {
        let ctx = assemble(&MemoryBundle::default(), &config());
        assert!(ctx.is_empty());
        assert_eq!(ctx.to_prompt_block(), "");
    }

    #[test]
    fn test_relevance_filter_scenario() {
        let bundle = MemoryBundle {
            facts: vec![Fact::new("likes coffee", 0.9), Fact::new("owns a cat", 0.3)],
            ..Default::default()
        };
        let ctx = assemble(&bundle, &config());
        let texts: Vec<&str> = ctx.facts.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["likes coffee"]);
        assert!(ctx.to_prompt_block().contains("likes coffee"));
        assert!(!ctx.to_prompt_block().contains("owns a cat"));
    }

    #[test]
    fn test_no_fact_below_floor_for_any_bundle() {
        for min in [0.0, 0.25, 0.5, 0.99, 1.0] {
            let cfg = MemoryConfig {
                min_fact_relevance: min,
                ..config()
            };
            for bundle in sample_bundles() {
                let ctx = assemble(&bundle, &cfg);
                assert!(ctx.facts.iter().all(|f| f.relevance >= min));
                assert!(ctx.facts.len() <= MAX_FACTS);
            }
        }
    }

    #[test]
    fn test_history_bounded_and_newest_kept() {
        for max in [1, 3, 10] {
            let cfg = MemoryConfig {
                max_context_messages: max,
                ..config()
            };
            for bundle in sample_bundles() {
                let ctx = assemble(&bundle, &cfg);
                assert!(ctx.recent_turns.len() <= max);
                assert_eq!(ctx.recent_turns.len(), bundle.history.len().min(max));
                if let Some(last) = bundle.history.last() {
                    assert_eq!(ctx.recent_turns.last().unwrap().seq, last.seq);
                }
                assert!(ctx
                    .recent_turns
                    .windows(2)
                    .all(|w| w[0].timestamp <= w[1].timestamp));
            }
        }
    }

    #[test]
    fn test_history_out_of_order_is_sorted() {
        let bundle = MemoryBundle {
            history: vec![turn(5, "five"), turn(1, "one"), turn(3, "three")],
            ..Default::default()
        };
        let ctx = assemble(&bundle, &config());
        let texts: Vec<&str> = ctx.recent_turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "three", "five"]);
    }

    #[test]
    fn test_assemble_is_idempotent() {
        for bundle in sample_bundles() {
            let a = assemble(&bundle, &config());
            let b = assemble(&bundle, &config());
            assert_eq!(a, b);
            assert_eq!(a.to_prompt_block(), b.to_prompt_block());
        }
    }

    #[test]
    fn test_include_flags_omit_sections() {
        let bundle = MemoryBundle {
            facts: vec![Fact::new("likes coffee", 0.9)],
            entities: vec![Entity {
                name: "Miso".to_string(),
                kind: "Pet".to_string(),
                summary: "A cat".to_string(),
            }],
            ..Default::default()
        };
        let cfg = MemoryConfig {
            include_facts: false,
            include_entities: false,
            ..config()
        };
        let ctx = assemble(&bundle, &cfg);
        assert!(ctx.is_empty());

        let block = assemble(&bundle, &config()).to_prompt_block();
        assert!(block.contains("## Relevant Entities\n- Miso (Pet): A cat"));
    }

    #[test]
    fn test_assistant_facts_are_dropped() {
        let bundle = MemoryBundle {
            facts: vec![
                Fact::new("Kwami is a voice assistant", 0.9),
                Fact::new("The user named the assistant Kwami", 0.9),
                Fact::new("User's name is Alex", 0.9),
            ],
            ..Default::default()
        };
        let ctx = assemble(&bundle, &config());
        assert_eq!(ctx.facts.len(), 1);
        assert_eq!(ctx.facts[0].text, "User's name is Alex");
    }

    #[test]
    fn test_expired_fact_is_annotated() {
        let mut fact = Fact::new("User lives in Lisbon", 0.8);
        fact.invalid_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let bundle = MemoryBundle {
            facts: vec![fact],
            ..Default::default()
        };
        let block = assemble(&bundle, &config()).to_prompt_block();
        assert!(block.contains("User lives in Lisbon (no longer valid since 2024-03-01)"));
    }

    #[test]
    fn test_long_turn_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_TURN_BYTES);
        let bundle = MemoryBundle {
            history: vec![turn(0, &long)],
            ..Default::default()
        };
        let ctx = assemble(&bundle, &config());
        let text = &ctx.recent_turns[0].text;
        assert!(text.ends_with("..."));
        assert!(text.len() <= MAX_TURN_BYTES + 3);
    }

    #[test]
    fn test_inject_into_prompt() {
        let bundle = MemoryBundle {
            facts: vec![Fact::new("likes coffee", 0.9)],
            ..Default::default()
        };
        let ctx = assemble(&bundle, &config());

        let prompt = inject_into_prompt("You are Kwami.", &ctx, true);
        assert!(prompt.starts_with("You are Kwami.\n\n# Memory Context"));
        assert!(prompt.contains("- likes coffee"));

        assert_eq!(inject_into_prompt("You are Kwami.", &ctx, false), "You are Kwami.");
        assert_eq!(
            inject_into_prompt("You are Kwami.", &MemoryContext::default(), true),
            "You are Kwami."
        );
    }

    #[test]
    fn test_safe_truncate_index() {
        assert_eq!(safe_truncate_index("hello", 10), 5);
        assert_eq!(safe_truncate_index("héllo", 2), 1);
        assert_eq!(truncate_message("hello world", 5), "hello...");
    }
}
