//! Static USD-per-million-token price table.

/// `(input, output)` USD per 1M tokens, matched by model-name prefix.
/// Longer prefixes come first so "gpt-4o-mini" wins over "gpt-4o".
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("o3-mini", 1.10, 4.40),
    ("o4-mini", 1.10, 4.40),
    ("o3", 10.00, 40.00),
    ("o1-mini", 3.00, 12.00),
    ("o1", 15.00, 60.00),
    ("claude-opus-4", 15.00, 75.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-haiku", 0.80, 4.00),
    ("deepseek-chat", 0.27, 1.10),
    ("deepseek-reasoner", 0.55, 2.19),
    ("llama-3.3-70b", 0.59, 0.79),
    ("llama-3.1-8b", 0.05, 0.08),
    ("gemini-2.0-flash", 0.10, 0.40),
    ("gemini-1.5-pro", 1.25, 5.00),
];

/// Estimated USD cost of one call. Unknown models cost 0.
///
/// `model` may be bare ("gpt-4o") or qualified ("openai/gpt-4o",
/// "openrouter/meta-llama/llama-3.3-70b"); only the last segment is matched.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
    PRICES
        .iter()
        .find(|(prefix, _, _)| name.starts_with(prefix))
        .map(|(_, input, output)| {
            (prompt_tokens as f64 * input + completion_tokens as f64 * output) / 1_000_000.0
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_cost() {
        let cost = estimate_cost("openai/gpt-4o", 1_000_000, 1_000_000);
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mini = estimate_cost("gpt-4o-mini", 1_000_000, 0);
        assert!((mini - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_is_free() {
        assert_eq!(estimate_cost("ollama/qwen2.5-coder", 5000, 5000), 0.0);
    }
}
