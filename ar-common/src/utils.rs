use regex::Regex;
use std::env;

/// Expands `"${VAR}"` and `"${VAR:default}"` placeholders in a config
/// document before it is parsed. Numeric and boolean expansions are left
/// unquoted so TOML keeps their type.
pub fn replace_env_variables(input: String) -> String {
    let re = Regex::new(r#""\$\{(\w+)(?::([^}]*))?\}""#).unwrap();

    re.replace_all(&input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let val = env::var(var_name).unwrap_or_else(|_| default.to_string());

        if val.parse::<f64>().is_ok() || val == "true" || val == "false" {
            val
        } else {
            format!("\"{val}\"")
        }
    })
    .into_owned()
}

/// Derives a DNS-1123 label from a user-supplied manifest name:
/// lowercase, every character outside `[a-z0-9-]` becomes `-`, runs of
/// `-` collapse, leading/trailing `-` are trimmed, length capped at 63.
pub fn sanitize_dns_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => ch,
            'A'..='Z' => ch.to_ascii_lowercase(),
            _ => '-',
        };
        if mapped == '-' {
            pending_dash = !out.is_empty();
            continue;
        }
        if pending_dash {
            out.push('-');
            pending_dash = false;
        }
        out.push(mapped);
    }

    out.truncate(63);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_env_variables() {
        struct TestCase {
            input: &'static str,
            want: &'static str,
        }

        let tests = vec![
            TestCase {
                input: r#"api_server = "${KUBE_API_SERVER:https://127.0.0.1:6443}""#,
                want: r#"api_server = "https://127.0.0.1:6443""#,
            },
            TestCase {
                input: r#"http_port = "${REGISTRY_HTTP_PORT:12121}""#,
                want: r#"http_port = 12121"#,
            },
            TestCase {
                input: r#"host = "${AR_POSTGRES_HOST}""#,
                want: r#"host = "10.0.0.8""#,
            },
            TestCase {
                input: r#"enabled = "${AR_LOCAL_RUNTIME:true}""#,
                want: r#"enabled = true"#,
            },
        ];

        unsafe { env::set_var("AR_POSTGRES_HOST", "10.0.0.8") }
        tests
            .into_iter()
            .for_each(|t| assert_eq!(replace_env_variables(t.input.to_string()), t.want));
    }

    #[test]
    fn test_sanitize_dns_label() {
        let cases = vec![
            ("io.github.github/github-mcp-server", "io-github-github-github-mcp-server"),
            ("Weather Server", "weather-server"),
            ("io.example/weather", "io-example-weather"),
            ("--already--dashed--", "already-dashed"),
            ("UPPER_case.mixed", "upper-case-mixed"),
            ("a@b#c", "a-b-c"),
        ];

        for (input, want) in cases {
            assert_eq!(sanitize_dns_label(input), want, "input: {}", input);
        }
    }

    #[test]
    fn test_sanitize_dns_label_idempotent() {
        let inputs = vec![
            "io.github.github/github-mcp-server",
            "Test Agent v1",
            "x",
            "a..b//c",
        ];
        for input in inputs {
            let once = sanitize_dns_label(input);
            assert_eq!(sanitize_dns_label(&once), once, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_sanitize_dns_label_length_cap() {
        let long = "a".repeat(80) + "-tail";
        let out = sanitize_dns_label(&long);
        assert!(out.len() <= 63);
        assert!(!out.ends_with('-'));
    }
}
