//! Namespace option assembly and network apply/teardown.

use std::collections::BTreeMap;

use porter_common::{PorterError, PorterResult};
use porter_net::cni::NamespaceOpt;
use porter_net::{portmap, resolve_netns_path};
use porter_store::{HostsStore, Meta};

use super::context::HandlerContext;
use super::note_failure;

/// Hostname hint consumed by DHCP-based CNI plugins.
const DHCP_HOSTNAME_ARG: &str = "NERDCTL_CNI_DHCP_HOSTNAME";

/// Port-map capability for the selected ports.
///
/// In rootless mode the CNI-bound copy gets host IPs the child namespace can
/// actually bind; the context's own port list stays untouched because the
/// port forwarder needs the original addresses.
pub(crate) fn port_map_opts(ctx: &HandlerContext) -> PorterResult<Vec<NamespaceOpt>> {
    if ctx.ports.is_empty() {
        return Ok(Vec::new());
    }
    if !ctx.rootless {
        return Ok(vec![NamespaceOpt::capability("portMappings", &ctx.ports)?]);
    }

    let mut child_ip = None;
    let mut disallow_loopback_child_ip = false;
    match ctx.supervisor.as_deref() {
        Some(supervisor) => match supervisor.info() {
            Ok(info) => {
                child_ip = info.network_driver.child_ip;
                disallow_loopback_child_ip = info.port_driver.disallow_loopback_child_ip;
            }
            Err(e) => tracing::warn!(
                error = %e,
                "cannot query the rootless supervisor; assuming default port-driver capabilities"
            ),
        },
        None => tracing::warn!(
            "rootless mode without a supervisor client; assuming default port-driver capabilities"
        ),
    }

    let rewritten = portmap::rewrite_for_child(&ctx.ports, child_ip, disallow_loopback_child_ip);
    Ok(vec![NamespaceOpt::capability("portMappings", &rewritten)?])
}

/// Static IPv4 argument.
pub(crate) fn ip_address_opts(ctx: &HandlerContext) -> PorterResult<Vec<NamespaceOpt>> {
    let Some(ip) = &ctx.container_ip else {
        return Ok(Vec::new());
    };
    if ctx.rootless {
        tracing::debug!(
            "static IP assignment is limited in rootless mode: the address is reachable from \
             other containers but not from the host"
        );
    }
    Ok(vec![
        // Loose argument verification, so plugins that do not know the IP
        // argument still accept the invocation.
        NamespaceOpt::label("IgnoreUnknown", "1"),
        NamespaceOpt::arg("IP", ip),
    ])
}

/// Static MAC argument.
pub(crate) fn mac_address_opts(ctx: &HandlerContext) -> PorterResult<Vec<NamespaceOpt>> {
    let Some(mac) = &ctx.container_mac else {
        return Ok(Vec::new());
    };
    Ok(vec![
        NamespaceOpt::label("IgnoreUnknown", "1"),
        NamespaceOpt::arg("MAC", mac),
    ])
}

/// Static IPv6 capability.
pub(crate) fn ip6_address_opts(ctx: &HandlerContext) -> PorterResult<Vec<NamespaceOpt>> {
    let Some(ip6) = &ctx.container_ip6 else {
        return Ok(Vec::new());
    };
    if ctx.rootless {
        tracing::debug!(
            "static IPv6 assignment is limited in rootless mode: the address is reachable from \
             other containers but not from the host"
        );
    }
    Ok(vec![
        NamespaceOpt::label("IgnoreUnknown", "1"),
        NamespaceOpt::capability("ips", &[ip6.clone()])?,
    ])
}

/// The full option set for CNI setup.
pub(crate) fn setup_namespace_opts(ctx: &HandlerContext) -> PorterResult<Vec<NamespaceOpt>> {
    let mut opts = port_map_opts(ctx)?;
    opts.extend(ip_address_opts(ctx)?);
    opts.extend(mac_address_opts(ctx)?);
    opts.extend(ip6_address_opts(ctx)?);
    opts.push(NamespaceOpt::label("IgnoreUnknown", "1"));
    opts.push(NamespaceOpt::arg(
        DHCP_HOSTNAME_ARG,
        ctx.annotations().hostname(),
    ));
    Ok(opts)
}

/// Detach the selected networks and release the network-coupled state.
///
/// Every step runs even when an earlier one fails; the first failure lands
/// in `first_err`, later ones are only logged. Ordering is load-bearing:
/// the bypass and the exposed ports are retracted before the namespace
/// attachment goes away, so no socket survives its namespace.
pub(crate) fn teardown_network(ctx: &HandlerContext, first_err: &mut Option<PorterError>) {
    let annotations = ctx.annotations();
    let namespace = annotations.namespace().unwrap_or_default();
    let (bypass_enabled, bind_enabled) = annotations.bypass_flags();
    if ctx.rootless {
        if bypass_enabled {
            let stopped = match ctx.bypass.as_deref() {
                Some(bypass) => bypass.stop_bypass(&ctx.state.id),
                None => Err(PorterError::Rpc {
                    message: "bypass4netns is enabled but no daemon client is available"
                        .to_string(),
                }),
            };
            note_failure(first_err, stopped, "bypass stop");
        }
        if !bind_enabled && !ctx.ports.is_empty() {
            let unexposed = match ctx.supervisor.as_deref() {
                Some(supervisor) => supervisor
                    .unexpose_ports(&ctx.ports)
                    .map_err(|e| PorterError::Rpc {
                        message: format!("failed to unexpose ports in rootless mode: {e}"),
                    }),
                None => Err(PorterError::Rpc {
                    message: "published ports in rootless mode need a supervisor client"
                        .to_string(),
                }),
            };
            note_failure(first_err, unexposed, "port unexposure");
        }
    }

    let namespace_opts = teardown_namespace_opts(ctx);
    if let Some(cni) = ctx.cni.as_deref() {
        note_failure(
            first_err,
            cni.remove(&ctx.full_id, "", &namespace_opts),
            "cni remove",
        );
    }

    let released = HostsStore::open(&ctx.data_store)
        .and_then(|store| store.release(namespace, &ctx.state.id));
    note_failure(first_err, released, "hosts-store release");
}

/// The option set for CNI teardown: the same generators, without the
/// setup-only hostname pair. Failures must not block the delete.
pub(crate) fn teardown_namespace_opts(ctx: &HandlerContext) -> Vec<NamespaceOpt> {
    let mut opts = Vec::new();
    let generators: [fn(&HandlerContext) -> PorterResult<Vec<NamespaceOpt>>; 4] = [
        port_map_opts,
        ip_address_opts,
        mac_address_opts,
        ip6_address_opts,
    ];
    for generator in generators {
        match generator(ctx) {
            Ok(generated) => opts.extend(generated),
            Err(e) => tracing::warn!(error = %e, "skipping a namespace option during teardown"),
        }
    }
    opts
}

/// Attach the selected networks and record the results.
///
/// Order matters: the namespace options and path are resolved first, CNI
/// setup runs next, and only a successful setup reaches the hosts store.
/// In rootless mode the bypass service and port exposure run last, against
/// the unrewritten port list.
pub(crate) fn apply_network_settings(ctx: &HandlerContext) -> PorterResult<()> {
    let cni = ctx.cni.as_deref().ok_or_else(|| PorterError::Internal {
        message: "network setup requires a CNI driver".to_string(),
    })?;

    let namespace_opts = setup_namespace_opts(ctx)?;
    let netns_path = resolve_netns_path(&ctx.state)?;
    let hosts_store = HostsStore::open(&ctx.data_store)?;

    let results = cni
        .setup(&ctx.full_id, &netns_path, &namespace_opts)
        .map_err(|e| PorterError::Cni {
            message: format!("failed to call cni.Setup: {e}"),
        })?;
    if results.len() != ctx.cni_names.len() {
        return Err(PorterError::Internal {
            message: format!(
                "CNI returned {} results for {} selected networks",
                results.len(),
                ctx.cni_names.len()
            ),
        });
    }

    let annotations = ctx.annotations();
    let mut networks = BTreeMap::new();
    for (name, result) in ctx.cni_names.iter().zip(results) {
        networks.insert(name.clone(), result);
    }
    let meta = Meta {
        namespace: annotations.namespace().unwrap_or_default().to_string(),
        id: ctx.state.id.clone(),
        name: annotations.name().to_string(),
        hostname: annotations.hostname().to_string(),
        extra_hosts: ctx.extra_hosts.clone(),
        networks,
    };
    let (bypass_enabled, bind_enabled) = annotations.bypass_flags();

    hosts_store.acquire(meta)?;

    if ctx.rootless {
        if bypass_enabled {
            let bypass = ctx.bypass.as_deref().ok_or_else(|| PorterError::Rpc {
                message: "bypass4netns is enabled but no daemon client is available".to_string(),
            })?;
            bypass.start_bypass(&ctx.ports, &ctx.state.id, &ctx.state_dir)?;
        }
        if !bind_enabled && !ctx.ports.is_empty() {
            let supervisor = ctx.supervisor.as_deref().ok_or_else(|| PorterError::Rpc {
                message: "published ports in rootless mode need a supervisor client".to_string(),
            })?;
            supervisor
                .expose_ports(&ctx.ports)
                .map_err(|e| PorterError::Rpc {
                    message: format!("failed to expose ports in rootless mode: {e}"),
                })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::testutil::{recorded_ports, test_context, MockCni, MockSupervisor};
    use porter_net::cni::CniResult;

    #[test]
    fn no_ports_yield_no_portmap_option() {
        let ctx = test_context(&[]);
        assert!(port_map_opts(&ctx).unwrap().is_empty());
    }

    #[test]
    fn rootful_ports_pass_through_verbatim() {
        let mut ctx = test_context(&[]);
        ctx.ports = vec![porter_net::PortMapping {
            host_ip: "0.0.0.0".to_string(),
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".to_string(),
        }];

        let opts = port_map_opts(&ctx).unwrap();
        assert_eq!(opts.len(), 1);
        let NamespaceOpt::Capability(name, value) = &opts[0] else {
            panic!("expected a capability option");
        };
        assert_eq!(name, "portMappings");
        assert_eq!(value[0]["HostIP"], "0.0.0.0");
    }

    #[test]
    fn rootless_rewrite_keeps_the_canonical_list_pristine() {
        let mut ctx = test_context(&[]);
        ctx.rootless = true;
        ctx.supervisor = Some(Box::new(MockSupervisor::new(Some("10.4.0.1"), false)));
        ctx.ports = vec![porter_net::PortMapping {
            host_ip: "192.168.1.10".to_string(),
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".to_string(),
        }];

        let opts = port_map_opts(&ctx).unwrap();
        let NamespaceOpt::Capability(_, value) = &opts[0] else {
            panic!("expected a capability option");
        };
        // CNI sees the loopback rewrite; the canonical list is untouched.
        assert_eq!(value[0]["HostIP"], "127.0.0.1");
        assert_eq!(ctx.ports[0].host_ip, "192.168.1.10");
    }

    #[test]
    fn static_address_opts_carry_loose_verification() {
        let mut ctx = test_context(&[]);
        ctx.container_ip = Some("10.4.0.100".to_string());
        ctx.container_mac = Some("02:42:0a:04:00:64".to_string());
        ctx.container_ip6 = Some("fd00::64".to_string());

        let ip = ip_address_opts(&ctx).unwrap();
        assert!(matches!(&ip[0], NamespaceOpt::Label(k, v) if k == "IgnoreUnknown" && v == "1"));
        assert!(matches!(&ip[1], NamespaceOpt::Arg(k, v) if k == "IP" && v == "10.4.0.100"));

        let mac = mac_address_opts(&ctx).unwrap();
        assert!(matches!(&mac[1], NamespaceOpt::Arg(k, _) if k == "MAC"));

        let ip6 = ip6_address_opts(&ctx).unwrap();
        let NamespaceOpt::Capability(name, value) = &ip6[1] else {
            panic!("expected a capability option");
        };
        assert_eq!(name, "ips");
        assert_eq!(value[0], "fd00::64");
    }

    #[test]
    fn portmap_opts_do_not_add_loose_verification() {
        let mut ctx = test_context(&[]);
        ctx.ports = vec![porter_net::PortMapping {
            host_ip: String::new(),
            host_port: 80,
            container_port: 80,
            protocol: "tcp".to_string(),
        }];
        let opts = port_map_opts(&ctx).unwrap();
        assert!(opts
            .iter()
            .all(|opt| !matches!(opt, NamespaceOpt::Label(k, _) if k == "IgnoreUnknown")));
    }

    #[test]
    fn setup_opts_end_with_the_dhcp_hostname_pair() {
        let ctx = test_context(&[(porter_oci::annotations::HOSTNAME, "web-1")]);
        let opts = setup_namespace_opts(&ctx).unwrap();
        let n = opts.len();
        assert!(
            matches!(&opts[n - 2], NamespaceOpt::Label(k, v) if k == "IgnoreUnknown" && v == "1")
        );
        assert!(
            matches!(&opts[n - 1], NamespaceOpt::Arg(k, v) if k == DHCP_HOSTNAME_ARG && v == "web-1")
        );
    }

    #[test]
    fn teardown_opts_skip_the_dhcp_hostname_pair() {
        let ctx = test_context(&[(porter_oci::annotations::HOSTNAME, "web-1")]);
        let opts = teardown_namespace_opts(&ctx);
        assert!(opts
            .iter()
            .all(|opt| !matches!(opt, NamespaceOpt::Arg(k, _) if k == DHCP_HOSTNAME_ARG)));
    }

    #[test]
    fn apply_records_results_by_network_name_in_order() {
        let data_store = tempfile::TempDir::new().unwrap();
        let results: Vec<CniResult> = (0..3)
            .map(|i| {
                serde_json::from_value(serde_json::json!({
                    "cniVersion": "1.0.0",
                    "ips": [{"address": format!("10.{i}.0.2/24")}],
                }))
                .unwrap()
            })
            .collect();

        let mut ctx = test_context(&[]);
        ctx.data_store = data_store.path().to_path_buf();
        ctx.cni_names = vec!["br0".to_string(), "br1".to_string(), "br2".to_string()];
        let cni = MockCni::new(results.clone());
        ctx.cni = Some(Box::new(cni));

        apply_network_settings(&ctx).unwrap();

        let store = HostsStore::open(data_store.path()).unwrap();
        let meta = store.get("default", "c1").unwrap().unwrap();
        assert_eq!(meta.networks.len(), 3);
        assert_eq!(meta.networks["br0"], results[0]);
        assert_eq!(meta.networks["br1"], results[1]);
        assert_eq!(meta.networks["br2"], results[2]);
    }

    #[test]
    fn apply_passes_the_full_id_and_netns_path_to_cni() {
        let data_store = tempfile::TempDir::new().unwrap();
        let mut ctx = test_context(&[]);
        ctx.data_store = data_store.path().to_path_buf();
        ctx.cni_names = vec!["bridge".to_string()];
        let cni = MockCni::new(vec![CniResult::default()]);
        let calls = cni.calls();
        ctx.cni = Some(Box::new(cni));
        ctx.ports = vec![porter_net::PortMapping {
            host_ip: "0.0.0.0".to_string(),
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".to_string(),
        }];

        apply_network_settings(&ctx).unwrap();

        let recorded = calls.take();
        assert_eq!(recorded.len(), 1);
        let (op, id, netns) = &recorded[0];
        assert_eq!(op, "setup");
        assert_eq!(id, "default-c1");
        assert_eq!(netns, &format!("/proc/{}/ns/net", std::process::id()));
    }

    #[test]
    fn cni_setup_failure_short_circuits_the_hosts_store() {
        let data_store = tempfile::TempDir::new().unwrap();
        let mut ctx = test_context(&[]);
        ctx.data_store = data_store.path().to_path_buf();
        ctx.cni_names = vec!["bridge".to_string()];
        ctx.cni = Some(Box::new(MockCni::failing_setup("address pool exhausted")));

        let err = apply_network_settings(&ctx).unwrap_err();
        assert!(err.to_string().starts_with("failed to call cni.Setup:"));

        let store = HostsStore::open(data_store.path()).unwrap();
        assert!(store.get("default", "c1").unwrap().is_none());
    }

    #[test]
    fn rootless_expose_receives_the_original_ports() {
        let data_store = tempfile::TempDir::new().unwrap();
        let mut ctx = test_context(&[]);
        ctx.data_store = data_store.path().to_path_buf();
        ctx.cni_names = vec!["bridge".to_string()];
        let cni = MockCni::new(vec![CniResult::default()]);
        let seen_opts = cni.opts();
        ctx.cni = Some(Box::new(cni));
        ctx.rootless = true;
        let supervisor = MockSupervisor::new(Some("10.4.0.1"), false);
        let exposed = supervisor.exposed();
        ctx.supervisor = Some(Box::new(supervisor));
        ctx.ports = vec![porter_net::PortMapping {
            host_ip: "192.168.1.10".to_string(),
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".to_string(),
        }];

        apply_network_settings(&ctx).unwrap();

        // CNI saw the rewritten copy; the supervisor saw the original.
        assert_eq!(recorded_ports(&seen_opts.take())[0], "127.0.0.1");
        assert_eq!(exposed.take()[0].host_ip, "192.168.1.10");
    }
}
