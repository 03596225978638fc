//! Assembles the system prompt and initial user message from a query and
//! table schema (spec §4.6). Pure and deterministic: no map-iteration order
//! or random salt may leak in, since prompt caching and snapshot tests rely
//! on byte-identical output for identical input (R1).

use ta_domain::session::TableInfo;

/// `(system_prompt, user_message)` for the first turn of an analysis.
pub fn build_prompt(query: &str, schema: &[TableInfo]) -> (String, String) {
    let system = build_system_prompt(schema);
    let user = build_user_message(query, schema);
    (system, user)
}

fn build_system_prompt(schema: &[TableInfo]) -> String {
    let mut out = String::new();
    out.push_str(
        "You are a data analysis agent. You answer questions about tabular data \
         by calling tools; you never compute results yourself. Every tool call \
         must include a `thought` field explaining why you are calling it.\n\n",
    );

    if schema.len() <= 1 {
        out.push_str("You have access to one table:\n\n");
    } else {
        out.push_str(&format!(
            "You have access to {} tables. When a question spans more than one \
             table, join them explicitly in your query rather than assuming a \
             relationship.\n\n",
            schema.len()
        ));
    }

    for table in schema {
        out.push_str(&describe_table(table));
        out.push('\n');
    }

    out.push_str(
        "When you have enough information to answer, call `final_answer` with \
         a concise answer, a chart type, and (if useful) chart axes. Do not \
         call `final_answer` and another tool in the same turn.",
    );
    out
}

fn describe_table(table: &TableInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Table `{}` ({} rows, columns: {})\n",
        table.table_name,
        table.row_count,
        table.columns.join(", ")
    ));
    if !table.sample_rows.is_empty() {
        out.push_str("Sample rows:\n");
        for row in &table.sample_rows {
            out.push_str(&format!("  {row}\n"));
        }
    }
    out
}

fn build_user_message(query: &str, schema: &[TableInfo]) -> String {
    if schema.len() <= 1 {
        format!("Question about the table: {query}")
    } else {
        format!(
            "Question about these {} tables: {query}",
            schema.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_table() -> Vec<TableInfo> {
        vec![TableInfo {
            table_name: "data".into(),
            columns: vec!["a".into(), "b".into()],
            sample_rows: vec![serde_json::json!({"a": 1, "b": 2})],
            row_count: 3,
        }]
    }

    fn two_tables() -> Vec<TableInfo> {
        let mut v = one_table();
        v.push(TableInfo {
            table_name: "other".into(),
            columns: vec!["c".into()],
            sample_rows: vec![],
            row_count: 0,
        });
        v
    }

    #[test]
    fn is_deterministic_across_calls() {
        let schema = two_tables();
        let a = build_prompt("how many rows?", &schema);
        let b = build_prompt("how many rows?", &schema);
        assert_eq!(a, b);
    }

    #[test]
    fn singular_phrasing_for_one_table() {
        let (system, user) = build_prompt("how many rows?", &one_table());
        assert!(system.contains("one table"));
        assert!(!system.contains("join them explicitly"));
        assert_eq!(user, "Question about the table: how many rows?");
    }

    #[test]
    fn plural_phrasing_and_join_guidance_for_multiple_tables() {
        let (system, user) = build_prompt("how many rows?", &two_tables());
        assert!(system.contains("2 tables"));
        assert!(system.contains("join them explicitly"));
        assert_eq!(user, "Question about these 2 tables: how many rows?");
    }

    #[test]
    fn embeds_table_name_and_row_count() {
        let (system, _) = build_prompt("q", &one_table());
        assert!(system.contains("Table `data`"));
        assert!(system.contains("3 rows"));
        assert!(system.contains("a, b"));
    }
}
