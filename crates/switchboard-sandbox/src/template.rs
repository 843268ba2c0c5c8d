//! Command-template rendering.
//!
//! Both `<param>` and `{param}` placeholder styles are accepted. Values come
//! from the call's parameter map, then the parameter's declared default.
//! A mandatory parameter with neither is an error. No shell interpolation
//! happens here; the rendered string goes to the executor as-is.

use std::collections::HashMap;

use crate::error::{Result, SandboxError};
use crate::types::SandboxedToolParameter;

pub fn render(
    template: &str,
    values: &HashMap<String, String>,
    definitions: &[SandboxedToolParameter],
) -> Result<String> {
    let mut rendered = template.to_string();

    for def in definitions {
        let value = values
            .get(&def.name)
            .cloned()
            .or_else(|| def.default.clone());

        let value = match value {
            Some(v) => v,
            None if def.required => return Err(SandboxError::MissingParameter(def.name.clone())),
            None => String::new(),
        };

        rendered = rendered
            .replace(&format!("<{}>", def.name), &value)
            .replace(&format!("{{{}}}", def.name), &value);
    }

    // Extra values not in the definition list still substitute; tools with
    // loose manifests rely on this.
    for (name, value) in values {
        rendered = rendered
            .replace(&format!("<{}>", name), value)
            .replace(&format!("{{{}}}", name), value);
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, required: bool, default: Option<&str>) -> SandboxedToolParameter {
        SandboxedToolParameter {
            name: name.to_string(),
            description: String::new(),
            required,
            default: default.map(|d| d.to_string()),
        }
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_both_placeholder_styles() {
        let defs = vec![param("target", true, None), param("output_file", true, None)];
        let rendered = render(
            "nmap -T4 <target> -oN {output_file}",
            &values(&[("target", "scanme.nmap.org"), ("output_file", "scan.txt")]),
            &defs,
        )
        .unwrap();
        assert_eq!(rendered, "nmap -T4 scanme.nmap.org -oN scan.txt");
    }

    #[test]
    fn default_fills_missing_optional() {
        let defs = vec![param("target", true, None), param("ports", false, Some("1-1024"))];
        let rendered = render(
            "nmap -p <ports> <target>",
            &values(&[("target", "example.com")]),
            &defs,
        )
        .unwrap();
        assert_eq!(rendered, "nmap -p 1-1024 example.com");
    }

    #[test]
    fn missing_mandatory_is_an_error() {
        let defs = vec![param("target", true, None)];
        let err = render("nmap <target>", &values(&[]), &defs).unwrap_err();
        assert!(matches!(err, SandboxError::MissingParameter(p) if p == "target"));
    }

    #[test]
    fn no_shell_interpolation_happens() {
        let defs = vec![param("target", true, None)];
        let rendered = render(
            "echo <target>",
            &values(&[("target", "$(rm -rf /)")]),
            &defs,
        )
        .unwrap();
        // The value is substituted literally; quoting is the executor's job.
        assert_eq!(rendered, "echo $(rm -rf /)");
    }

    #[test]
    fn undeclared_values_still_substitute() {
        let rendered = render("curl <url>", &values(&[("url", "https://example.com")]), &[])
            .unwrap();
        assert_eq!(rendered, "curl https://example.com");
    }
}
