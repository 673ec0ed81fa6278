//! Reverse proxy configuration rendered from the project topology.
use crate::config::ProjectConfig;
use crate::service::{HealthCheck, Service};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

pub const PROXY_SERVICE: &str = "proxy";
/// Directory inside the proxy container holding certificates.
const SSL_DIR: &str = "/etc/nginx/ssl";
const CONF_DIR: &str = "/etc/nginx/conf.d";
/// The container runtime's embedded DNS server on user defined networks.
const RUNTIME_RESOLVER: &str = "127.0.0.11";

struct Location<'a> {
    path: String,
    service: &'a Service,
    strip_prefix: bool,
}

fn upstream_variable(service: &str) -> String {
    let sanitized: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("$upstream_{sanitized}")
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        format!("{trimmed}/")
    } else {
        format!("/{trimmed}/")
    }
}

/// Renders the nginx configuration for `config`.
///
/// Upstreams are addressed through variables so nginx re-resolves service
/// aliases at request time and follows a cutover within the resolver's
/// validity window.
pub fn render_config(config: &ProjectConfig) -> String {
    let domain = &config.project.domain;

    // longest prefix first; a later route for the same path is dropped
    let mut by_path: BTreeMap<String, Location<'_>> = BTreeMap::new();
    for service in &config.services {
        for route in &service.routes {
            let path = normalize_path(&route.path);
            by_path.entry(path.clone()).or_insert(Location {
                path,
                service,
                strip_prefix: route.strip_prefix,
            });
        }
    }
    let mut locations: Vec<Location<'_>> = by_path.into_values().collect();
    locations.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.path.cmp(&b.path)));

    let mut out = String::new();
    // writing into a String cannot fail
    let _ = writeln!(out, "resolver {RUNTIME_RESOLVER} valid=1s ipv6=off;");
    let _ = writeln!(out);
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 80;");
    let _ = writeln!(out, "    server_name {domain};");
    let _ = writeln!(out);
    let _ = writeln!(out, "    location /.well-known/acme-challenge/ {{");
    let _ = writeln!(out, "        root /var/www/certbot;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        return 301 https://$host$request_uri;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 443 ssl;");
    let _ = writeln!(out, "    http2 on;");
    let _ = writeln!(out, "    server_name {domain};");
    let _ = writeln!(out);
    let _ = writeln!(out, "    ssl_certificate {SSL_DIR}/{domain}.crt;");
    let _ = writeln!(out, "    ssl_certificate_key {SSL_DIR}/{domain}.key;");
    let _ = writeln!(out, "    ssl_protocols TLSv1.2 TLSv1.3;");
    let _ = writeln!(out, "    ssl_session_cache shared:SSL:10m;");

    for location in &locations {
        let service = location.service;
        let variable = upstream_variable(&service.name);
        let _ = writeln!(out);
        let _ = writeln!(out, "    location {} {{", location.path);
        let _ = writeln!(
            out,
            "        set {variable} http://{}:{};",
            service.name, service.port
        );
        if location.strip_prefix && location.path != "/" {
            let _ = writeln!(
                out,
                "        rewrite ^{}(.*)$ /$1 break;",
                location.path
            );
        }
        let _ = writeln!(out, "        proxy_pass {variable};");
        let _ = writeln!(out, "        proxy_http_version 1.1;");
        let _ = writeln!(out, "        proxy_set_header Host $host;");
        let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(
            out,
            "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
        );
        let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
        let _ = writeln!(out, "        proxy_set_header Upgrade $http_upgrade;");
        let _ = writeln!(out, "        proxy_set_header Connection \"upgrade\";");
        let _ = writeln!(out, "    }}");
    }
    let _ = writeln!(out, "}}");
    out
}

/// The proxy as a managed service. `project_dir` holds the certificates,
/// `config_dir` the rendered configuration.
///
/// The routing configuration is mounted, not baked into the service, so a
/// topology change leaves the content hash alone and is applied by reloading
/// the running proxy.
pub fn proxy_service(config: &ProjectConfig, image: &str, project_dir: &str, config_dir: &str) -> Service {
    Service {
        name: PROXY_SERVICE.to_string(),
        image: image.to_string(),
        port: 80,
        env: BTreeMap::from([
            ("DOMAIN".to_string(), config.project.domain.clone()),
            ("EMAIL".to_string(), config.project.email.clone()),
        ]),
        volumes: vec![
            format!("{project_dir}/:{SSL_DIR}"),
            format!("{config_dir}:{CONF_DIR}"),
        ],
        forwards: vec!["80:80".to_string(), "443:443".to_string()],
        health_check: Some(HealthCheck {
            path: "/".to_string(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            retries: 30,
        }),
        routes: Vec::new(),
    }
}
