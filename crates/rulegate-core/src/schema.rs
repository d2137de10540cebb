/// Arrow schema definitions for persisted compliance rules.
pub mod rules {
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    /// Name of the table holding rules in columnar stores.
    pub const TABLE: &str = "rules";

    /// Schema for the `rules` table with a fixed-size embedding column.
    ///
    /// `predicate_spec` holds the tagged JSON encoding of the predicate.
    pub fn rules_schema(dim: i32) -> Schema {
        Schema::new(vec![
            Field::new("rule_id", DataType::Utf8, false),
            Field::new("framework", DataType::Utf8, false),
            Field::new("control_id", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("predicate_spec", DataType::Utf8, false),
            Field::new("remediation_template", DataType::Utf8, false),
            Field::new("risk_priority", DataType::Utf8, false),
            Field::new("source_doc_id", DataType::Utf8, false),
            Field::new("source_start", DataType::UInt64, false),
            Field::new("source_end", DataType::UInt64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
                true,
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::rules;
    use arrow::datatypes::DataType;

    #[test]
    fn rules_schema_has_expected_fields() {
        let schema = rules::rules_schema(384);
        assert_eq!(schema.fields().len(), 11);
        assert!(schema.field_with_name("rule_id").is_ok());
        assert!(schema.field_with_name("predicate_spec").is_ok());
    }

    #[test]
    fn embedding_dimension_is_configurable() {
        let schema = rules::rules_schema(64);
        let field = schema.field_with_name("embedding").unwrap();
        assert!(matches!(field.data_type(), DataType::FixedSizeList(_, 64)));
    }
}
