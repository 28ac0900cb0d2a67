//! In-process routing-daemon vty.
//!
//! Speaks enough of the Quagga zebra vty over a [`tokio::io::duplex`] pipe
//! to drive the dynamic-routing adapter: telnet option offers, password
//! login, enable, `terminal length 0`, `configure terminal`, static route
//! add/remove and `show ip route` listings in the daemon's own format.

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const IAC: u8 = 255;
const WILL: u8 = 251;
const DO: u8 = 253;
const ECHO: u8 = 1;
const SGA: u8 = 3;
const NAWS: u8 = 31;

const HOSTNAME: &str = "zebra";
const STATIC_INTERFACE: &str = "eth1";

const BANNER: &str = "\r\nHello, this is Quagga (version 0.99.22.4).\r\n\
Copyright 1996-2005 Kunihiro Ishiguro, et al.\r\n\r\n\r\n\
User Access Verification\r\n\r\n";

const CODES: &str = "Codes: K - kernel route, C - connected, S - static, R - RIP,\r\n       \
O - OSPF, I - IS-IS, B - BGP, A - Babel,\r\n       \
> - selected route, * - FIB route\r\n\r\n";

/// Mutable daemon state shared by every session.
#[derive(Debug, Default)]
pub struct ZebraState {
    /// Static routes in insertion order.
    pub static_routes: Vec<(Ipv4Net, Ipv4Addr)>,
    /// Connected networks and their interfaces.
    pub connected: Vec<(Ipv4Net, String)>,
    /// Lines received in configuration mode.
    pub config_commands: Vec<String>,
    /// Config lines containing any of these are answered as unknown.
    pub rejected: Vec<String>,
    pub refuse_connections: bool,
    /// Stop answering after login.
    pub silent: bool,
    pub sessions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Login { failures: u8 },
    View,
    EnablePassword,
    Enable,
    Config,
}

/// A fake zebra daemon.
#[derive(Debug, Clone)]
pub struct FakeZebra {
    password: String,
    enable_password: Option<String>,
    state: Arc<Mutex<ZebraState>>,
}

impl FakeZebra {
    pub fn new(password: &str, enable_password: Option<&str>) -> Self {
        let mut state = ZebraState::default();
        if let Ok(loopback) = Ipv4Net::new(Ipv4Addr::new(127, 0, 0, 0), 8) {
            state.connected.push((loopback, "lo".to_string()));
        }
        Self {
            password: password.to_string(),
            enable_password: enable_password.map(str::to_string),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Opens a vty session. Must be called inside a tokio runtime.
    pub fn connect(&self) -> io::Result<DuplexStream> {
        {
            let mut state = self.state.lock();
            if state.refuse_connections {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"));
            }
            state.sessions += 1;
        }
        let (client, server) = tokio::io::duplex(16 * 1024);
        let session = Session {
            daemon: self.clone(),
            node: Node::Login { failures: 0 },
        };
        tokio::spawn(session.serve(server));
        Ok(client)
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, ZebraState> {
        self.state.lock()
    }

    /// Static routes as `(prefix, next hop)` strings.
    pub fn static_routes(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .static_routes
            .iter()
            .map(|(net, nh)| (net.to_string(), nh.to_string()))
            .collect()
    }

    /// Installs a static route as if configured by someone else.
    pub fn preload_static(&self, prefix: &str, next_hop: &str) {
        if let (Ok(net), Ok(nh)) = (prefix.parse(), next_hop.parse()) {
            self.state.lock().static_routes.push((net, nh));
        }
    }

    pub fn add_connected(&self, prefix: &str, interface: &str) {
        if let Ok(net) = prefix.parse() {
            self.state
                .lock()
                .connected
                .push((net, interface.to_string()));
        }
    }

    /// Lines entered in configuration mode, across all sessions.
    pub fn config_commands(&self) -> Vec<String> {
        self.state.lock().config_commands.clone()
    }

    /// Config lines containing `pattern` fail as unknown commands.
    pub fn reject_matching(&self, pattern: &str) {
        self.state.lock().rejected.push(pattern.to_string());
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions
    }
}

struct Session {
    daemon: FakeZebra,
    node: Node,
}

/// What to do after handling a line.
enum Reply {
    Send(String),
    Close(String),
}

impl Session {
    async fn serve(mut self, mut stream: DuplexStream) {
        let greeting = [IAC, WILL, ECHO, IAC, WILL, SGA, IAC, DO, NAWS];
        if stream.write_all(&greeting).await.is_err() {
            return;
        }
        if stream
            .write_all(format!("{}Password: ", BANNER).as_bytes())
            .await
            .is_err()
        {
            return;
        }

        let mut pending = Vec::new();
        let mut buf = [0u8; 1024];
        let mut skip = 0usize;
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                // Option replies from the client are three bytes long.
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                if byte == IAC {
                    skip = 2;
                    continue;
                }
                pending.push(byte);
            }

            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if self.daemon.state.lock().silent && !matches!(self.node, Node::Login { .. }) {
                    continue;
                }
                match self.handle(&line) {
                    Reply::Send(out) => {
                        if stream.write_all(out.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Reply::Close(out) => {
                        let _ = stream.write_all(out.as_bytes()).await;
                        return;
                    }
                }
            }
        }
    }

    fn prompt(&self) -> String {
        match self.node {
            Node::Login { .. } | Node::EnablePassword => "Password: ".to_string(),
            Node::View => format!("{}> ", HOSTNAME),
            Node::Enable => format!("{}# ", HOSTNAME),
            Node::Config => format!("{}(config)# ", HOSTNAME),
        }
    }

    fn handle(&mut self, line: &str) -> Reply {
        match self.node {
            Node::Login { failures } => {
                if line == self.daemon.password {
                    self.node = Node::View;
                    return Reply::Send(format!("\r\n{}", self.prompt()));
                }
                if failures >= 2 {
                    return Reply::Close("\r\n% Bad passwords, too many failures!\r\n".to_string());
                }
                self.node = Node::Login {
                    failures: failures + 1,
                };
                Reply::Send(format!("\r\n{}", self.prompt()))
            }
            Node::EnablePassword => {
                let ok = self.daemon.enable_password.as_deref() == Some(line);
                self.node = if ok { Node::Enable } else { Node::View };
                let notice = if ok { "" } else { "% Bad passwords, too many failures!\r\n" };
                Reply::Send(format!("\r\n{}{}", notice, self.prompt()))
            }
            Node::View | Node::Enable | Node::Config => {
                let echo = format!("{}\r\n", line);
                match self.command(line) {
                    Some(out) => Reply::Send(format!("{}{}{}", echo, out, self.prompt())),
                    None => Reply::Close(echo),
                }
            }
        }
    }

    /// Runs a command line; `None` closes the session.
    fn command(&mut self, line: &str) -> Option<String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let unknown = "% Unknown command.\r\n".to_string();
        let out = match (self.node, words.as_slice()) {
            (_, []) => String::new(),
            (Node::View | Node::Enable, ["exit" | "quit"]) => return None,
            (Node::View, ["enable" | "en"]) => match self.daemon.enable_password {
                Some(_) => {
                    self.node = Node::EnablePassword;
                    String::new()
                }
                None => {
                    self.node = Node::Enable;
                    String::new()
                }
            },
            (Node::Enable, ["disable"]) => {
                self.node = Node::View;
                String::new()
            }
            (Node::Enable, ["terminal", "length", _]) => String::new(),
            (Node::Enable, ["configure" | "conf", "terminal" | "t"]) => {
                self.node = Node::Config;
                String::new()
            }
            (Node::View | Node::Enable, ["show" | "sh", "ip", "route"]) => self.show_routes(),
            (Node::View | Node::Enable, ["show" | "sh", "ip", "route", prefix]) => {
                self.show_route(prefix)
            }
            (Node::Config, ["end" | "exit"]) => {
                self.node = Node::Enable;
                String::new()
            }
            (Node::Config, _) => self.configure(line, &words),
            _ => unknown,
        };
        Some(out)
    }

    fn configure(&mut self, line: &str, words: &[&str]) -> String {
        let mut state = self.daemon.state.lock();
        state.config_commands.push(line.to_string());
        if state.rejected.iter().any(|p| line.contains(p.as_str())) {
            return "% Unknown command.\r\n".to_string();
        }

        let (negate, args) = match words {
            ["no", "ip", "route", rest @ ..] => (true, rest),
            ["ip", "route", rest @ ..] => (false, rest),
            _ => return "% Unknown command.\r\n".to_string(),
        };
        let [address, mask, next_hop] = args else {
            return "% Command incomplete.\r\n".to_string();
        };
        let parsed = (
            address.parse::<Ipv4Addr>(),
            mask.parse::<Ipv4Addr>(),
            next_hop.parse::<Ipv4Addr>(),
        );
        let (Ok(address), Ok(mask), Ok(next_hop)) = parsed else {
            return "% Malformed address\r\n".to_string();
        };
        let Some(net) = ipnet::ipv4_mask_to_prefix(mask)
            .ok()
            .and_then(|len| Ipv4Net::new(address, len).ok())
        else {
            return "% Inconsistent address and mask\r\n".to_string();
        };
        let net = net.trunc();

        let entry = (net, next_hop);
        let existing = state.static_routes.iter().position(|r| *r == entry);
        match (negate, existing) {
            (false, None) => state.static_routes.push(entry),
            (false, Some(_)) => {}
            (true, Some(index)) => {
                state.static_routes.remove(index);
            }
            (true, None) => return "% Can't find static route specified\r\n".to_string(),
        }
        String::new()
    }

    fn show_routes(&self) -> String {
        let state = self.daemon.state.lock();
        let mut out = CODES.to_string();
        for (net, interface) in &state.connected {
            out.push_str(&format!("C>* {} is directly connected, {}\r\n", net, interface));
        }
        for (net, next_hop) in &state.static_routes {
            out.push_str(&format!(
                "S>* {} [1/0] via {}, {}\r\n",
                net, next_hop, STATIC_INTERFACE
            ));
        }
        out
    }

    fn show_route(&self, prefix: &str) -> String {
        let Ok(wanted) = prefix.parse::<Ipv4Net>() else {
            return "% Malformed address\r\n".to_string();
        };
        let state = self.daemon.state.lock();
        if let Some((net, next_hop)) = state.static_routes.iter().find(|(n, _)| *n == wanted) {
            return format!(
                "Routing entry for {}\r\n  Known via \"static\", distance 1, metric 0, best\r\n  * {}, via {}\r\n\r\n",
                net, next_hop, STATIC_INTERFACE
            );
        }
        if let Some((net, interface)) = state.connected.iter().find(|(n, _)| *n == wanted) {
            return format!(
                "Routing entry for {}\r\n  Known via \"connected\", distance 0, metric 0, best\r\n  * directly connected, {}\r\n\r\n",
                net, interface
            );
        }
        "% Network not in table\r\n".to_string()
    }
}
