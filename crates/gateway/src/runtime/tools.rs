//! Declarative tool catalog (spec §4.5): the fixed set of tools the LLM may
//! invoke, each classified as browser-executed (the server suspends and
//! waits for the client to run it locally) or server-terminal
//! (`final_answer`, which concludes the analysis without a round trip).

use serde_json::json;

use ta_domain::tool::{ToolClass, ToolDefinition};

/// The fixed tool catalog. Every schema requires `thought` alongside its
/// own parameters (spec §4.5), surfaced to the client in the `tool_call`
/// event and persisted on the step record.
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn standard() -> Self {
        Self {
            tools: vec![
                run_query(),
                get_column_stats(),
                get_value_distribution(),
                transform_data(),
                final_answer(),
            ],
        }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_server_terminal(&self, name: &str) -> bool {
        matches!(
            self.get(name).map(|t| t.class),
            Some(ToolClass::ServerTerminal)
        )
    }
}

fn with_thought(mut params: serde_json::Value) -> serde_json::Value {
    let obj = params
        .as_object_mut()
        .expect("tool parameter schemas are always objects");
    let properties = obj
        .entry("properties")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("properties is always an object");
    properties.insert("thought".into(), json!({
        "type": "string",
        "description": "Why this tool call moves the analysis forward.",
    }));
    let required = obj
        .entry("required")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .expect("required is always an array");
    required.push(json!("thought"));
    params
}

fn run_query() -> ToolDefinition {
    ToolDefinition {
        name: "run_query".into(),
        description: "Run a SQL query against the loaded tables and return the result rows."
            .into(),
        parameters: with_thought(json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A SQL query against the loaded table(s)."
                }
            },
            "required": ["sql"]
        })),
        class: ToolClass::BrowserExecuted,
    }
}

fn get_column_stats() -> ToolDefinition {
    ToolDefinition {
        name: "get_column_stats".into(),
        description: "Compute summary statistics (min, max, mean, null count, etc.) for a column."
            .into(),
        parameters: with_thought(json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "column": { "type": "string" }
            },
            "required": ["table", "column"]
        })),
        class: ToolClass::BrowserExecuted,
    }
}

fn get_value_distribution() -> ToolDefinition {
    ToolDefinition {
        name: "get_value_distribution".into(),
        description: "Compute the frequency distribution of values in a column.".into(),
        parameters: with_thought(json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "column": { "type": "string" },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of distinct values to return."
                }
            },
            "required": ["table", "column"]
        })),
        class: ToolClass::BrowserExecuted,
    }
}

fn transform_data() -> ToolDefinition {
    ToolDefinition {
        name: "transform_data".into(),
        description: "Run a JavaScript expression against a table's rows to derive a new column \
                      or reshape the data client-side."
            .into(),
        parameters: with_thought(json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "expression": {
                    "type": "string",
                    "description": "A JavaScript expression evaluated per row."
                }
            },
            "required": ["table", "expression"]
        })),
        class: ToolClass::BrowserExecuted,
    }
}

fn final_answer() -> ToolDefinition {
    ToolDefinition {
        name: "final_answer".into(),
        description: "Conclude the analysis with a natural-language answer and an optional chart."
            .into(),
        parameters: with_thought(json!({
            "type": "object",
            "properties": {
                "answer": { "type": "string" },
                "chartType": {
                    "type": "string",
                    "enum": ["table", "bar", "line", "pie", "scatter"]
                },
                "chartData": {
                    "type": "array",
                    "items": { "type": "object" }
                }
            },
            "required": ["answer", "chartType"]
        })),
        class: ToolClass::ServerTerminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_the_five_spec_tools() {
        let catalog = ToolCatalog::standard();
        let names: Vec<&str> = catalog.definitions().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "run_query",
                "get_column_stats",
                "get_value_distribution",
                "transform_data",
                "final_answer"
            ]
        );
    }

    #[test]
    fn every_schema_requires_thought() {
        let catalog = ToolCatalog::standard();
        for tool in catalog.definitions() {
            let required = tool.parameters["required"]
                .as_array()
                .expect("required must be an array");
            assert!(
                required.iter().any(|v| v == "thought"),
                "{} is missing required `thought`",
                tool.name
            );
            assert!(tool.parameters["properties"]["thought"].is_object());
        }
    }

    #[test]
    fn only_final_answer_is_server_terminal() {
        let catalog = ToolCatalog::standard();
        for tool in catalog.definitions() {
            let expected = tool.name == "final_answer";
            assert_eq!(catalog.is_server_terminal(&tool.name), expected);
        }
    }

    #[test]
    fn get_returns_none_for_unknown_tool() {
        let catalog = ToolCatalog::standard();
        assert!(catalog.get("nonexistent").is_none());
    }
}
