//! Least-privilege audit over a parsed IAM export.
//!
//! Expects the shape produced by the IAM parser:
//! `{"users": [{"username", "privileges", "permissions", "mfa_enabled"}],
//!   "groups": [{"name", "privileges", "permissions", "policy"}]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rule::RiskPriority;

/// More permissions than this on one principal is flagged as excessive.
pub const MAX_PERMISSIONS: usize = 10;

/// One audit finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamFinding {
    pub risk: RiskPriority,
    pub issue: String,
}

/// Risk-scored audit summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamAuditReport {
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub details: Vec<IamFinding>,
}

impl IamAuditReport {
    fn push(&mut self, risk: RiskPriority, issue: String) {
        match risk {
            RiskPriority::High => self.high_risk += 1,
            RiskPriority::Medium => self.medium_risk += 1,
            RiskPriority::Low => self.low_risk += 1,
        }
        self.details.push(IamFinding { risk, issue });
    }
}

/// Audit users and groups for missing MFA and over-privilege.
pub fn audit_iam(iam: &Value) -> IamAuditReport {
    let mut report = IamAuditReport::default();

    for user in principals(iam, "users") {
        let name = str_field(user, "username");
        if name == "root" && !user.get("mfa_enabled").and_then(Value::as_bool).unwrap_or(false) {
            report.push(RiskPriority::High, "Root user has no MFA enabled".into());
        }
        check_privileges(&mut report, "User", name, user);
    }

    for group in principals(iam, "groups") {
        let name = str_field(group, "name");
        check_privileges(&mut report, "Group", name, group);
        if group.get("policy").and_then(Value::as_str) == Some("full_access") {
            report.push(
                RiskPriority::Medium,
                format!("Group {name} has full access policy"),
            );
        }
    }

    report
}

fn check_privileges(report: &mut IamAuditReport, kind: &str, name: &str, principal: &Value) {
    if principal.get("privileges").and_then(Value::as_str) == Some("admin") {
        report.push(
            RiskPriority::Medium,
            format!("{kind} {name} has admin privileges"),
        );
    }

    let Some(permissions) = principal.get("permissions").and_then(Value::as_array) else {
        return;
    };
    if permissions
        .iter()
        .any(|p| matches!(p.as_str(), Some("*") | Some("admin")))
    {
        report.push(
            RiskPriority::Medium,
            format!("{kind} {name} has overprivileged permissions ('*' or 'admin')"),
        );
    }
    if permissions.len() > MAX_PERMISSIONS {
        report.push(
            RiskPriority::Low,
            format!("{kind} {name} has too many permissions ({})", permissions.len()),
        );
    }
}

fn principals<'a>(iam: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    iam.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}
