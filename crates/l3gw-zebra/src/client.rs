//! zebra vty client.
//!
//! A session walks login, enable and `terminal length 0` once, then issues
//! configuration commands as `configure terminal` / command / `end`. Every
//! step waits for the expected prompt and fails the whole operation if it
//! does not arrive.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;
use l3gw_common::cidr::to_addr_netmask;
use l3gw_common::{L3Error, L3Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::routes::{parse_route_table, parse_route_target, RouteVia, ZebraRoute};
use crate::session::{Connector, VtySession, SERVICE};

static PASSWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Password:\s*\z").expect("Invalid regex pattern"));

static ENABLE_PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\n)[\w.-]+#\s*\z").expect("Invalid regex pattern"));

static CONFIG_PROMPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\n)[\w.-]+\(config[\w-]*\)#\s*\z").expect("Invalid regex pattern")
});

/// Any state the daemon can leave us in after a password or `enable`.
static LOGIN_STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Password:|(?:^|\n)[\w.-]+[>#])\s*\z").expect("Invalid regex pattern")
});

/// Daemon error lines start with `%`.
static DAEMON_ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(%.*?)\s*$").expect("Invalid regex pattern"));

const UNKNOWN_COMMAND: &str = "Unknown command";
const ROUTE_NOT_FOUND: &str = "Can't find static route";
const BAD_PASSWORDS: &str = "Bad passwords";

/// Login secrets for the vty.
#[derive(Clone, Default)]
pub struct Credentials {
    pub password: String,
    /// `None` when the daemon grants enable without a password.
    pub enable_password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"<redacted>")
            .field("enable_password", &self.enable_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Build the static route configuration line.
pub fn build_static_route_cmd(net: &Ipv4Net, next_hop: Ipv4Addr, remove: bool) -> String {
    let (address, netmask) = to_addr_netmask(net);
    let cmd = format!("ip route {} {} {}", address, netmask, next_hop);
    if remove {
        format!("no {}", cmd)
    } else {
        cmd
    }
}

/// First `%` line of a daemon response.
fn daemon_error(output: &str) -> Option<String> {
    DAEMON_ERROR_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

async fn login(session: &mut VtySession, credentials: &Credentials) -> L3Result<()> {
    session.read_until(&PASSWORD_RE).await?;
    session.write_line(&credentials.password).await?;
    let reply = session.read_until(&LOGIN_STEP_RE).await?;
    if PASSWORD_RE.is_match(&reply) || reply.contains(BAD_PASSWORDS) {
        return Err(L3Error::service_contact(SERVICE, "login password rejected"));
    }

    if !ENABLE_PROMPT_RE.is_match(&reply) {
        session.write_line("enable").await?;
        let mut reply = session.read_until(&LOGIN_STEP_RE).await?;
        if PASSWORD_RE.is_match(&reply) {
            let Some(enable_password) = credentials.enable_password.as_deref() else {
                return Err(L3Error::service_contact(
                    SERVICE,
                    "enable password requested but none configured",
                ));
            };
            session.write_line(enable_password).await?;
            reply = session.read_until(&LOGIN_STEP_RE).await?;
        }
        if !ENABLE_PROMPT_RE.is_match(&reply) {
            return Err(L3Error::service_contact(SERVICE, "enable password rejected"));
        }
    }

    session.write_line("terminal length 0").await?;
    session.read_until(&ENABLE_PROMPT_RE).await?;
    Ok(())
}

/// Runs one configuration line and returns the daemon's response to it.
async fn configure_on(session: &mut VtySession, command: &str) -> L3Result<String> {
    session.write_line("configure terminal").await?;
    session.read_until(&CONFIG_PROMPT_RE).await?;
    session.write_line(command).await?;
    let output = session.read_until(&CONFIG_PROMPT_RE).await?;
    session.write_line("end").await?;
    session.read_until(&ENABLE_PROMPT_RE).await?;
    Ok(output)
}

async fn query_on(session: &mut VtySession, command: &str) -> L3Result<String> {
    session.write_line(command).await?;
    session.read_until(&ENABLE_PROMPT_RE).await
}

/// Client for the zebra vty.
///
/// The session is opened by [`ZebraClient::connect`] and reopened lazily
/// after a contact error, so one broken connection fails one call.
pub struct ZebraClient {
    connector: Box<dyn Connector>,
    credentials: Credentials,
    timeout: Duration,
    session: Option<VtySession>,
}

impl ZebraClient {
    pub fn new(connector: Box<dyn Connector>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            connector,
            credentials,
            timeout,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a fresh session and logs in.
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> L3Result<()> {
        self.disconnect();
        let stream = self.connector.connect().await?;
        let mut session = VtySession::new(stream, self.timeout);
        login(&mut session, &self.credentials).await?;
        info!("Logged in to zebra at {}", self.connector.endpoint());
        self.session = Some(session);
        Ok(())
    }

    /// Drops the session. The daemon sees the connection close.
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("Closed zebra session");
        }
    }

    async fn session(&mut self) -> L3Result<&mut VtySession> {
        if self.session.is_none() {
            self.connect().await?;
        }
        self.session
            .as_mut()
            .ok_or_else(|| L3Error::internal("zebra session missing after connect"))
    }

    fn check_contact<T>(&mut self, result: L3Result<T>) -> L3Result<T> {
        if let Err(L3Error::ServiceContact { message, .. }) = &result {
            warn!("Dropping zebra session: {}", message);
            self.disconnect();
        }
        result
    }

    async fn configure(&mut self, command: &str) -> L3Result<String> {
        debug!("Running command '{}'", command);
        let session = self.session().await?;
        let result = configure_on(session, command).await;
        self.check_contact(result)
    }

    async fn query(&mut self, command: &str) -> L3Result<String> {
        let session = self.session().await?;
        let result = query_on(session, command).await;
        self.check_contact(result)
    }

    /// Adds a static route for `net` via `next_hop`.
    #[instrument(skip(self))]
    pub async fn add_static_route(&mut self, net: &Ipv4Net, next_hop: Ipv4Addr) -> L3Result<()> {
        let cmd = build_static_route_cmd(net, next_hop, false);
        let output = self.configure(&cmd).await?;
        match daemon_error(&output) {
            Some(error) => Err(L3Error::InvalidCommand {
                command: cmd,
                output: error,
            }),
            None => Ok(()),
        }
    }

    /// Removes a static route. Returns false if the daemon did not have it.
    #[instrument(skip(self))]
    pub async fn del_static_route(&mut self, net: &Ipv4Net, next_hop: Ipv4Addr) -> L3Result<bool> {
        let cmd = build_static_route_cmd(net, next_hop, true);
        let output = self.configure(&cmd).await?;
        match daemon_error(&output) {
            Some(error) if error.contains(ROUTE_NOT_FOUND) => Ok(false),
            Some(error) => Err(L3Error::InvalidCommand {
                command: cmd,
                output: error,
            }),
            None => Ok(true),
        }
    }

    /// Selected routes of the daemon, loopback excluded.
    pub async fn show_ip_route(&mut self) -> L3Result<Vec<ZebraRoute>> {
        let output = self.query("show ip route").await?;
        if output.contains(UNKNOWN_COMMAND) {
            return Err(L3Error::InvalidCommand {
                command: "show ip route".to_string(),
                output,
            });
        }
        Ok(parse_route_table(&output))
    }

    /// The target the daemon selected for exactly `net`, if any.
    pub async fn route_target(&mut self, net: &Ipv4Net) -> L3Result<Option<RouteVia>> {
        let output = self.query(&format!("show ip route {}", net)).await?;
        Ok(parse_route_target(&output))
    }
}
