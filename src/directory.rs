//! Connected client directory.

use crate::codec;
use crate::session::Session;
use crate::transport::Connector;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Marker that starts every client entry in a `clientlist` reply.
const CLIENT_MARKER: &str = "clid=";

/// `client_type` of a real voice client (as opposed to a query client).
const REAL_USER_TYPE: &str = "0";

/// One connected client, as listed by `clientlist`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    fields: BTreeMap<String, String>,
}

impl ClientRecord {
    /// Client id. Always present in parsed records.
    #[must_use]
    pub fn clid(&self) -> &str {
        self.get("clid").unwrap_or_default()
    }

    /// Nickname with spaces decoded.
    #[must_use]
    pub fn nickname(&self) -> String {
        self.get("client_nickname")
            .map_or_else(|| "unknown".to_string(), codec::decode_field_value)
    }

    #[must_use]
    pub fn client_type(&self) -> Option<&str> {
        self.get("client_type")
    }

    /// Channel the client is currently in.
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        self.get("cid")
    }

    /// Whether this is a real user rather than a query client.
    #[must_use]
    pub fn is_real_user(&self) -> bool {
        self.client_type() == Some(REAL_USER_TYPE)
    }

    /// Raw value of any field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl fmt::Display for ClientRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id {})", self.nickname(), self.clid())
    }
}

/// Parse every entry of a `clientlist` reply.
///
/// The reply is split on `clid=`; the text before the first marker is
/// discarded and each following block is one client whose first token is
/// the id. Entries are also separated by `|` on the wire, so tokens are
/// split on whitespace and `|`. The trailing status line is ignored.
/// Malformed blocks are skipped.
#[must_use]
pub fn parse_client_list(reply: &str) -> Vec<ClientRecord> {
    let body = reply
        .find(codec::REPLY_SENTINEL)
        .map_or(reply, |pos| &reply[..pos]);

    body.split(CLIENT_MARKER)
        .skip(1)
        .filter_map(|block| {
            let mut tokens = block
                .split(|c: char| c.is_whitespace() || c == '|')
                .filter(|t| !t.is_empty());
            let clid = tokens.next()?;
            if clid.contains('=') {
                return None;
            }

            let mut fields = BTreeMap::new();
            fields.insert("clid".to_string(), clid.to_string());
            for (key, value) in tokens.filter_map(|t| t.split_once('=')) {
                fields.insert(key.to_string(), value.to_string());
            }
            Some(ClientRecord { fields })
        })
        .collect()
}

/// Keep real users only.
#[must_use]
pub fn real_users(records: Vec<ClientRecord>) -> Vec<ClientRecord> {
    records.into_iter().filter(ClientRecord::is_real_user).collect()
}

/// Drop the record belonging to the bot itself.
#[must_use]
pub fn excluding(records: Vec<ClientRecord>, bot_client_id: Option<&str>) -> Vec<ClientRecord> {
    records
        .into_iter()
        .filter(|r| Some(r.clid()) != bot_client_id)
        .collect()
}

impl<C: Connector> Session<C> {
    /// Real users currently connected.
    ///
    /// Returns an empty list when the query fails for any reason.
    pub async fn list_clients(&mut self) -> Vec<ClientRecord> {
        let reply = match self.request("clientlist").await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("clientlist failed: {}", e);
                return Vec::new();
            }
        };
        if !codec::is_success(&reply) {
            warn!("clientlist failed: {}", codec::describe_reply(&reply));
            return Vec::new();
        }

        let records = parse_client_list(&reply);
        debug!("clientlist returned {} entries", records.len());
        real_users(records)
    }

    /// Real users currently connected, without the bot.
    pub async fn list_clients_excluding_self(&mut self) -> Vec<ClientRecord> {
        let clients = self.list_clients().await;
        let eligible = excluding(clients, self.bot_client_id());
        debug!("{} eligible clients", eligible.len());
        eligible
    }
}
