// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reverse-proxy label synthesis.
//!
//! Builds the Traefik labels attached to an instance container. Pure string
//! construction keyed by endpoint id and instance slug; deterministic for a
//! given input so it can be tested without a container runtime.

use crate::instance_types::InstanceTypeConfig;

/// Build the full Traefik label set for one instance container.
///
/// Every endpoint declared by the type gets a router bound to
/// `<endpoint>-<slug>.<root_domain>` and a service targeting the endpoint's
/// container port. All routers carry a context-header middleware that
/// injects `X-MCP-Instance: <slug>`. Endpoints with bearer auth, and the
/// `mcp` endpoint unconditionally, additionally go through a forward-auth
/// middleware pointing at `forward_auth_url`.
pub fn build_traefik_labels(
    type_cfg: &InstanceTypeConfig,
    slug: &str,
    root_domain: &str,
    docker_network: &str,
    forward_auth_url: &str,
) -> Vec<String> {
    let mut labels = vec![
        "is_mcp_instance=true".to_string(),
        "traefik.enable=true".to_string(),
        format!("traefik.docker.network={docker_network}"),
    ];

    for (endpoint_id, ep) in &type_cfg.endpoints {
        let router = format!("{endpoint_id}-{slug}");
        let host = format!("{endpoint_id}-{slug}.{root_domain}");

        labels.push(format!("traefik.http.routers.{router}.rule=Host(`{host}`)"));
        labels.push(format!("traefik.http.routers.{router}.entrypoints=web"));
        labels.push(format!("traefik.http.routers.{router}.tls=false"));
        labels.push(format!("traefik.http.routers.{router}.service={router}"));
        labels.push(format!(
            "traefik.http.services.{router}.loadbalancer.server.port={}",
            ep.port
        ));

        // Context header middleware carrying the instance slug.
        labels.push(format!(
            "traefik.http.middlewares.ctx-{slug}.headers.customrequestheaders.X-MCP-Instance={slug}"
        ));

        let mut middlewares = vec![format!("ctx-{slug}")];
        if ep.requires_bearer(endpoint_id) {
            labels.push(format!(
                "traefik.http.middlewares.mcp-{slug}-auth.forwardauth.address={forward_auth_url}"
            ));
            labels.push(format!(
                "traefik.http.middlewares.mcp-{slug}-auth.forwardauth.authRequestHeaders=Authorization,X-MCP-Instance"
            ));
            middlewares.push(format!("mcp-{slug}-auth"));
        }

        labels.push(format!(
            "traefik.http.routers.{router}.middlewares={}",
            middlewares.join(",")
        ));
    }

    labels
}
