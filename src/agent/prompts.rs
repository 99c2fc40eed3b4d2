//! Default system prompt

/// Used unless `agent.system_prompt` overrides it
pub const SYSTEM_PROMPT: &str = "\
You are a helpful assistant with access to tools provided by an MCP server. \
Use a tool whenever it can give you information you do not already have, \
and base your answer on what the tools return. \
If a tool reports an error, explain what went wrong or try a different approach \
instead of repeating the same call. \
When you have enough information, answer the user directly and concisely.";

/// Resolve the system prompt, preferring a configured override
pub fn system_prompt(configured: Option<&str>) -> &str {
    match configured {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => SYSTEM_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_and_fallback() {
        assert_eq!(system_prompt(Some("Be terse.")), "Be terse.");
        assert_eq!(system_prompt(Some("   ")), SYSTEM_PROMPT);
        assert_eq!(system_prompt(None), SYSTEM_PROMPT);
    }
}
