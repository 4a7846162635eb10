//! nginx rendering and syntax checks

use std::fmt::Write as _;

use crate::errors::LaunchError;
use crate::proxy::topology::{PathMatch, Route, Topology};
use crate::utils::sha256_hash;

/// Rendered configuration text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub text: String,
    pub sha256: String,
}

impl ProxyConfig {
    pub fn new(text: String) -> Self {
        let sha256 = sha256_hash(text.as_bytes());
        Self { text, sha256 }
    }
}

/// Quote a value for an nginx directive
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn not_ready_location(route: &Route) -> Option<String> {
    route
        .not_ready_service
        .map(|service| format!("@not_ready_{}", service.ident()))
}

fn render_route(out: &mut String, route: &Route) {
    let PathMatch::Prefix(prefix) = &route.matcher;
    let profile = route.profile;

    let _ = writeln!(out, "        location {} {{", prefix);
    if route.strip_prefix {
        let _ = writeln!(out, "            proxy_pass http://{}/;", route.upstream);
    } else {
        let _ = writeln!(out, "            proxy_pass http://{};", route.upstream);
    }
    out.push_str("            proxy_http_version 1.1;\n");
    out.push_str("            proxy_set_header Host $host;\n");
    out.push_str("            proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("            proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("            proxy_set_header X-Forwarded-Proto $scheme;\n");
    if route.websocket {
        out.push_str("            proxy_set_header Upgrade $http_upgrade;\n");
        out.push_str("            proxy_set_header Connection $connection_upgrade;\n");
    }
    let _ = writeln!(
        out,
        "            proxy_connect_timeout {}s;",
        profile.connect_timeout().as_secs()
    );
    let _ = writeln!(
        out,
        "            proxy_read_timeout {}s;",
        profile.read_timeout().as_secs()
    );
    let _ = writeln!(
        out,
        "            proxy_send_timeout {}s;",
        profile.read_timeout().as_secs()
    );
    if !profile.buffering() {
        out.push_str("            proxy_buffering off;\n");
        out.push_str("            proxy_cache off;\n");
    }
    let _ = writeln!(
        out,
        "            client_max_body_size {};",
        profile.max_body_size().unwrap_or("0")
    );

    if !route.rewrites.is_empty() {
        out.push_str("            proxy_set_header Accept-Encoding \"\";\n");
        out.push_str("            sub_filter_once off;\n");
        out.push_str("            sub_filter_types application/json text/plain text/css application/javascript;\n");
        for rewrite in &route.rewrites {
            let _ = writeln!(
                out,
                "            sub_filter {} {};",
                quote(&rewrite.from),
                quote(&rewrite.to)
            );
        }
    }

    if let Some(location) = not_ready_location(route) {
        let _ = writeln!(out, "            error_page 502 503 504 = {};", location);
    }
    out.push_str("        }\n");
}

fn render_not_ready(out: &mut String, topology: &Topology) {
    let mut seen = Vec::new();
    for route in &topology.routes {
        let (Some(service), Some(location)) = (route.not_ready_service, not_ready_location(route)) else {
            continue;
        };
        if seen.contains(&location) {
            continue;
        }
        let body = serde_json::json!({"error": "service_not_ready", "service": service.to_string()});
        let _ = writeln!(out, "        location {} {{", location);
        out.push_str("            default_type application/json;\n");
        let _ = writeln!(out, "            return 503 {};", quote(&body.to_string()));
        out.push_str("        }\n");
        seen.push(location);
    }
}

fn render_server_common(out: &mut String, topology: &Topology) {
    let _ = writeln!(out, "        server_name {};", topology.listen.server_name);
    let _ = writeln!(out, "        # topology: {}", topology.mode);
    for route in &topology.routes {
        render_route(out, route);
    }
    render_not_ready(out, topology);
}

/// Render a complete configuration file
pub fn render(topology: &Topology) -> ProxyConfig {
    let mut out = String::new();
    out.push_str("# Generated by stackup; changes are overwritten on regeneration\n");
    out.push_str("worker_processes auto;\n\n");
    out.push_str("events {\n    worker_connections 1024;\n}\n\n");
    out.push_str("http {\n");
    out.push_str("    default_type application/octet-stream;\n");
    out.push_str("    sendfile on;\n");
    out.push_str("    keepalive_timeout 65;\n\n");
    out.push_str("    map $http_upgrade $connection_upgrade {\n");
    out.push_str("        default upgrade;\n");
    out.push_str("        '' close;\n");
    out.push_str("    }\n\n");

    for upstream in &topology.upstreams {
        let _ = writeln!(out, "    upstream {} {{", upstream.name);
        let _ = writeln!(out, "        server {};", upstream.server);
        out.push_str("    }\n");
    }
    out.push('\n');

    out.push_str("    server {\n");
    let _ = writeln!(out, "        listen {};", topology.listen.http_port);
    render_server_common(&mut out, topology);
    out.push_str("    }\n\n");

    out.push_str("    server {\n");
    let _ = writeln!(out, "        listen {} ssl;", topology.listen.https_port);
    let _ = writeln!(out, "        ssl_certificate {};", topology.listen.tls_cert);
    let _ = writeln!(out, "        ssl_certificate_key {};", topology.listen.tls_key);
    render_server_common(&mut out, topology);
    out.push_str("    }\n");
    out.push_str("}\n");

    ProxyConfig::new(out)
}

/// Structural validation independent of the proxy binary: balanced blocks,
/// terminated directives and upstreams with at least one server.
pub fn validate_syntax(text: &str) -> Result<(), LaunchError> {
    let err = |line: usize, msg: &str| LaunchError::ProxyError(format!("line {}: {}", line, msg));

    // (block header, saw a `server` directive)
    let mut blocks: Vec<(String, bool)> = Vec::new();
    let mut statement = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;
    let mut line = 1;

    for c in text.chars() {
        if c == '\n' {
            line += 1;
            in_comment = false;
        }
        if in_comment {
            continue;
        }
        if let Some(q) = quote {
            statement.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '#' => in_comment = true,
            '\'' | '"' => {
                quote = Some(c);
                statement.push(c);
            }
            ';' => {
                let directive = statement.trim();
                if directive.is_empty() {
                    return Err(err(line, "empty directive"));
                }
                if let Some((header, has_server)) = blocks.last_mut() {
                    if header.starts_with("upstream") && directive.starts_with("server ") {
                        *has_server = true;
                    }
                }
                statement.clear();
            }
            '{' => {
                let header = statement.trim().to_string();
                if header.is_empty() {
                    return Err(err(line, "block without a name"));
                }
                blocks.push((header, false));
                statement.clear();
            }
            '}' => {
                if !statement.trim().is_empty() {
                    return Err(err(line, &format!("unterminated directive '{}'", statement.trim())));
                }
                let Some((header, has_server)) = blocks.pop() else {
                    return Err(err(line, "unbalanced '}'"));
                };
                if header.starts_with("upstream") && !has_server {
                    return Err(err(line, &format!("'{}' has no server", header)));
                }
                statement.clear();
            }
            _ => statement.push(c),
        }
    }

    if quote.is_some() {
        return Err(err(line, "unterminated quoted string"));
    }
    if !statement.trim().is_empty() {
        return Err(err(line, &format!("unterminated directive '{}'", statement.trim())));
    }
    if let Some((header, _)) = blocks.last() {
        return Err(err(line, &format!("unclosed block '{}'", header)));
    }
    Ok(())
}
