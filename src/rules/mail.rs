use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

use super::RuleError;

/// Templates the service itself knows how to fill in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TemplateCode {
    MissingPunch,
    ApprovalRequest,
    OvertimeDecision,
}

impl TemplateCode {
    /// Variables the service supplies when rendering this template.
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            TemplateCode::MissingPunch => &["name", "date", "missing"],
            TemplateCode::ApprovalRequest => &["name", "date", "approver"],
            TemplateCode::OvertimeDecision => &["name", "date", "minutes", "decision"],
        }
    }
}

enum Piece<'a> {
    Text(&'a str),
    Var(&'a str),
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>, RuleError> {
    let mut pieces = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            pieces.push(Piece::Text(&rest[..open]));
        }
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| {
            RuleError::MalformedTemplate(format!("unterminated placeholder near byte {open}"))
        })?;
        let name = after[..close].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RuleError::MalformedTemplate(format!(
                "invalid placeholder name '{}'",
                &after[..close]
            )));
        }
        pieces.push(Piece::Var(name));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

/// Names used by `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>, RuleError> {
    let mut names: Vec<String> = Vec::new();
    for piece in parse(template)? {
        if let Piece::Var(name) = piece {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Fails on placeholders outside `allowed`.
pub fn check_placeholders(template: &str, allowed: &[&str]) -> Result<(), RuleError> {
    for name in placeholders(template)? {
        if !allowed.contains(&name.as_str()) {
            return Err(RuleError::UnknownPlaceholder(name));
        }
    }
    Ok(())
}

pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, RuleError> {
    let mut out = String::with_capacity(template.len());
    for piece in parse(template)? {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Var(name) => {
                let value = vars
                    .get(name)
                    .ok_or_else(|| RuleError::UnknownPlaceholder(name.to_string()))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_placeholders() {
        let out = render(
            "Hello {{name}}, your {{ missing }} punch on {{date}} is missing.",
            &vars(&[("name", "Aiko"), ("missing", "out"), ("date", "2024-05-01")]),
        )
        .unwrap();
        assert_eq!(out, "Hello Aiko, your out punch on 2024-05-01 is missing.");
    }

    #[test]
    fn unknown_variable_is_an_error() {
        assert_eq!(
            render("Hi {{nickname}}", &vars(&[("name", "Aiko")])),
            Err(RuleError::UnknownPlaceholder("nickname".to_string()))
        );
    }

    #[test]
    fn malformed_templates() {
        assert!(matches!(
            render("Hi {{name", &vars(&[("name", "A")])),
            Err(RuleError::MalformedTemplate(_))
        ));
        assert!(matches!(placeholders("{{ }}"), Err(RuleError::MalformedTemplate(_))));
        assert!(matches!(placeholders("{{a-b}}"), Err(RuleError::MalformedTemplate(_))));
    }

    #[test]
    fn lists_placeholders_once() {
        assert_eq!(
            placeholders("{{name}} {{date}} {{ name }}").unwrap(),
            vec!["name".to_string(), "date".to_string()]
        );
        assert!(placeholders("plain text").unwrap().is_empty());
    }

    #[test]
    fn builtin_templates_check_their_variables() {
        for code in TemplateCode::iter() {
            let body: String = code
                .variables()
                .iter()
                .map(|v| format!("{{{{{v}}}}}"))
                .collect();
            assert!(check_placeholders(&body, code.variables()).is_ok(), "{code}");
        }
        assert_eq!(
            check_placeholders("{{salary}}", TemplateCode::MissingPunch.variables()),
            Err(RuleError::UnknownPlaceholder("salary".to_string()))
        );
        assert_eq!("missing_punch".parse::<TemplateCode>(), Ok(TemplateCode::MissingPunch));
    }
}
