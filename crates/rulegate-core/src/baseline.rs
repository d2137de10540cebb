//! Built-in storage-account baseline, usable without a language service.

use crate::RuleError;
use crate::predicate::{Polarity, PredicateSpec, ThresholdOp};
use crate::rule::{RiskPriority, Rule};

struct Control {
    control_id: &'static str,
    description: &'static str,
    predicate: PredicateSpec,
    remediation: &'static str,
}

fn controls() -> Vec<Control> {
    vec![
        Control {
            control_id: "BASE-1",
            description: "Enable soft delete for Blob Storage",
            predicate: PredicateSpec::FieldThreshold {
                path: "blob_properties.delete_retention_policy.days".into(),
                operator: ThresholdOp::Ge,
                value: 1.0,
            },
            remediation: "resource \"azurerm_storage_account\" \"{{resource_id}}\" {\n  \
                          blob_properties {\n    delete_retention_policy {\n      days = 7\n    }\n  }\n}",
        },
        Control {
            control_id: "BASE-2",
            description: "Enforce HTTPS traffic only on Storage Account",
            predicate: PredicateSpec::FieldEquals {
                path: "enable_https_traffic_only".into(),
                expected: serde_json::Value::Bool(true),
            },
            remediation: "enable_https_traffic_only = true  # on {{resource_id}}",
        },
        Control {
            control_id: "BASE-3",
            description: "Enable Storage Account encryption",
            predicate: PredicateSpec::FieldPresent {
                path: "encryption".into(),
                polarity: Polarity::Present,
            },
            remediation: "encryption {\n  services {\n    blob {\n      enabled = true\n    }\n    \
                          file {\n      enabled = true\n    }\n  }\n  key_type = \"Account\"\n}",
        },
        Control {
            control_id: "BASE-4",
            description: "Restrict network access with firewall rules",
            predicate: PredicateSpec::FieldEquals {
                path: "network_rules.default_action".into(),
                expected: serde_json::Value::String("Deny".into()),
            },
            remediation: "network_rules {\n  default_action = \"Deny\"\n  bypass         = [\"AzureServices\"]\n}",
        },
        Control {
            control_id: "BASE-5",
            description: "Enable advanced threat protection",
            predicate: PredicateSpec::FieldEquals {
                path: "advanced_threat_protection.enabled".into(),
                expected: serde_json::Value::Bool(true),
            },
            remediation: "resource \"azurerm_advanced_threat_protection\" \"{{resource_id}}\" {\n  \
                          target_resource_id = azurerm_storage_account.{{resource_id}}.id\n  enabled = true\n}",
        },
    ]
}

/// The baseline controls as rules tagged with `framework`.
///
/// Embeddings are left empty; callers embed them before storing.
pub fn baseline_rules(framework: &str) -> Result<Vec<Rule>, RuleError> {
    controls()
        .into_iter()
        .map(|c| {
            Ok(
                Rule::new(framework, c.description, c.predicate, c.remediation)?
                    .with_control_id(c.control_id)
                    .with_priority(RiskPriority::High),
            )
        })
        .collect()
}
