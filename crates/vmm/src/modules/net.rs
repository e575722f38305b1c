use super::{read_rendered, rendered_files};
use crate::maps::{NetEndpoint, NetEntry};
use crate::options::Notification;
use crate::plugin::{Capabilities, Context, Module, Registrar, Registration, Scope};
use crate::vfs::{DirEntry, VfsStatus};
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

const AF_INET: u16 = 2;
const AF_INET6: u16 = 23;

pub fn register(registrar: &mut Registrar<'_>) {
    registrar.register(Registration::new("net", Scope::ROOT, Box::new(Net::default())));
}

/// Rendered table, dropped on every medium refresh.
#[derive(Default)]
struct Net {
    text: Option<Arc<String>>,
}

fn endpoint(af: u16, ep: &NetEndpoint) -> String {
    if !ep.valid {
        return "***".to_owned();
    }
    if !ep.text.is_empty() {
        return format!("{}:{}", ep.text, ep.port);
    }
    match af {
        AF_INET => {
            let [a, b, c, d, ..] = ep.addr;
            format!("{}:{}", Ipv4Addr::new(a, b, c, d), ep.port)
        }
        AF_INET6 => format!("[{}]:{}", Ipv6Addr::from(ep.addr), ep.port),
        _ => format!("?:{}", ep.port),
    }
}

pub(crate) fn netstat_text(entries: &[NetEntry]) -> String {
    let mut out = String::new();
    for (i, e) in entries.iter().enumerate() {
        let proto = if e.af == AF_INET6 { "TCPv6" } else { "TCPv4" };
        let _ = writeln!(
            out,
            "{:04x} {:>7} {:<5} {:<12} {:<28} {:<28} {}",
            i,
            e.pid,
            proto,
            e.state_name(),
            endpoint(e.af, &e.src),
            endpoint(e.af, &e.dst),
            e.text
        );
    }
    out
}

impl Net {
    fn text(&mut self, ctx: &Context<'_>) -> Option<Arc<String>> {
        if self.text.is_none() {
            let map = ctx.vmm.map_net().ok()?;
            self.text = Some(Arc::new(netstat_text(&map)));
        }
        self.text.clone()
    }
}

impl Module for Net {
    fn capabilities(&self) -> Capabilities {
        Capabilities::LIST | Capabilities::READ | Capabilities::NOTIFY | Capabilities::VISIBLE
    }

    fn list(&mut self, ctx: &Context<'_>) -> Option<Vec<DirEntry>> {
        if !ctx.path.is_empty() {
            return None;
        }
        let text = self.text(ctx)?;
        Some(rendered_files(&["netstat.txt"], |_| Some(text.to_string())))
    }

    fn read(&mut self, ctx: &Context<'_>, buf: &mut [u8], offset: u64) -> (VfsStatus, usize) {
        if !ctx.path.eq_ignore_ascii_case("netstat.txt") {
            return (VfsStatus::FileInvalid, 0);
        }
        read_rendered(self.text(ctx).map(|t| t.to_string()), buf, offset)
    }

    fn notify(&mut self, _ctx: &Context<'_>, event: Notification) {
        if matches!(event, Notification::RefreshMedium | Notification::RefreshSlow) {
            self.text = None;
        }
    }

    fn visible(&mut self, ctx: &Context<'_>) -> bool {
        ctx.vmm.map_net().is_ok_and(|map| !map.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_render_by_family() {
        let mut ep = NetEndpoint {
            valid: true,
            port: 443,
            ..NetEndpoint::default()
        };
        ep.addr[..4].copy_from_slice(&[10, 0, 0, 1]);
        assert_eq!(endpoint(AF_INET, &ep), "10.0.0.1:443");
        ep.addr = Ipv6Addr::LOCALHOST.octets();
        assert_eq!(endpoint(AF_INET6, &ep), "[::1]:443");
        ep.valid = false;
        assert_eq!(endpoint(AF_INET, &ep), "***");
    }
}
