//! Command wrappers for the daemon's administrative verbs
//!
//! Every wrapper reduces to one [`Session::request`] or
//! [`Session::streamed_request`] call with the daemon's command and event
//! names. Imperative verbs check the `success`/`errmsg` convention in the
//! reply; query verbs hand the reply back as-is for the caller to pick
//! apart.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::Session;

impl Session {
    /// Returns daemon and system version information.
    pub async fn version(&self) -> Result<Message> {
        self.request("version", Message::new()).await
    }

    /// Returns IKE daemon statistics and load information.
    pub async fn stats(&self) -> Result<Message> {
        self.request("stats", Message::new()).await
    }

    /// Reloads strongswan.conf settings and any plugins supporting reload.
    pub async fn reload_settings(&self) -> Result<()> {
        self.confirmed("reload-settings", Message::new()).await
    }

    /// Initiates an SA.
    pub async fn initiate(&self, sa: Message) -> Result<()> {
        self.confirmed("initiate", sa).await
    }

    /// Terminates an SA.
    pub async fn terminate(&self, sa: Message) -> Result<()> {
        self.confirmed("terminate", sa).await
    }

    /// Initiates re-keying of an SA.
    pub async fn rekey(&self, sa: Message) -> Result<()> {
        self.confirmed("rekey", sa).await
    }

    /// Redirects a client-initiated IKE_SA to another gateway.
    pub async fn redirect(&self, sa: Message) -> Result<()> {
        self.confirmed("redirect", sa).await
    }

    /// Installs a trap, drop or bypass policy defined by a CHILD_SA config.
    pub async fn install(&self, policy: Message) -> Result<()> {
        self.confirmed("install", policy).await
    }

    /// Uninstalls a trap, drop or bypass policy.
    pub async fn uninstall(&self, policy: Message) -> Result<()> {
        self.confirmed("uninstall", policy).await
    }

    /// Lists active IKE_SAs and their CHILD_SAs by streaming `list-sa`
    /// events.
    pub async fn list_sas(&self, filter: Message) -> Result<Vec<Message>> {
        self.collect_streamed("list-sas", "list-sa", filter).await
    }

    /// Lists installed trap, drop and bypass policies by streaming
    /// `list-policy` events.
    pub async fn list_policies(&self, filter: Message) -> Result<Vec<Message>> {
        self.collect_streamed("list-policies", "list-policy", filter)
            .await
    }

    /// Lists loaded connections by streaming `list-conn` events.
    pub async fn list_conns(&self, filter: Message) -> Result<Vec<Message>> {
        self.collect_streamed("list-conns", "list-conn", filter).await
    }

    /// Returns the names of connections loaded over this interface.
    pub async fn get_conns(&self) -> Result<Message> {
        self.request("get-conns", Message::new()).await
    }

    /// Lists loaded certificates by streaming `list-cert` events.
    pub async fn list_certs(&self, filter: Message) -> Result<Vec<Message>> {
        self.collect_streamed("list-certs", "list-cert", filter).await
    }

    /// Lists loaded certification authorities by streaming
    /// `list-authority` events.
    pub async fn list_authorities(&self, filter: Message) -> Result<Vec<Message>> {
        self.collect_streamed("list-authorities", "list-authority", filter)
            .await
    }

    /// Returns the names of loaded certification authorities.
    pub async fn get_authorities(&self) -> Result<Message> {
        self.request("get-authorities", Message::new()).await
    }

    /// Loads a connection definition, replacing any existing connection
    /// with the same name.
    pub async fn load_conn(&self, conn: Message) -> Result<()> {
        self.confirmed("load-conn", conn).await
    }

    /// Unloads a previously loaded connection by name.
    pub async fn unload_conn(&self, conn: Message) -> Result<()> {
        self.confirmed("unload-conn", conn).await
    }

    /// Loads a certificate into the daemon.
    pub async fn load_cert(&self, cert: Message) -> Result<()> {
        self.confirmed("load-cert", cert).await
    }

    /// Loads a private key; the reply carries the key identifier.
    pub async fn load_key(&self, key: Message) -> Result<Message> {
        let reply = self.request("load-key", key).await?;
        check_success("load-key", &reply)?;
        Ok(reply)
    }

    /// Unloads a private key by its key identifier.
    pub async fn unload_key(&self, key: Message) -> Result<()> {
        self.confirmed("unload-key", key).await
    }

    /// Returns the identifiers of private keys loaded over this interface.
    pub async fn get_keys(&self) -> Result<Message> {
        self.request("get-keys", Message::new()).await
    }

    /// Loads a private key located on a token; the reply carries the key
    /// identifier.
    pub async fn load_token(&self, token: Message) -> Result<Message> {
        let reply = self.request("load-token", token).await?;
        check_success("load-token", &reply)?;
        Ok(reply)
    }

    /// Loads a shared IKE PSK, EAP, XAuth or NTLM secret.
    pub async fn load_shared(&self, secret: Message) -> Result<()> {
        self.confirmed("load-shared", secret).await
    }

    /// Unloads a shared secret by its unique identifier.
    pub async fn unload_shared(&self, secret: Message) -> Result<()> {
        self.confirmed("unload-shared", secret).await
    }

    /// Returns the unique identifiers of shared secrets loaded over this
    /// interface.
    pub async fn get_shared(&self) -> Result<Message> {
        self.request("get-shared", Message::new()).await
    }

    /// Flushes the certificate cache, optionally only entries of a given
    /// type.
    pub async fn flush_certs(&self, filter: Message) -> Result<()> {
        self.confirmed("flush-certs", filter).await
    }

    /// Clears all loaded certificate, key and shared-secret credentials.
    pub async fn clear_creds(&self) -> Result<()> {
        self.confirmed("clear-creds", Message::new()).await
    }

    /// Loads a certification authority definition, replacing any existing
    /// authority with the same name.
    pub async fn load_authority(&self, authority: Message) -> Result<()> {
        self.confirmed("load-authority", authority).await
    }

    /// Unloads a previously loaded certification authority by name.
    pub async fn unload_authority(&self, authority: Message) -> Result<()> {
        self.confirmed("unload-authority", authority).await
    }

    /// Loads an in-memory virtual IP and configuration attribute pool.
    pub async fn load_pool(&self, pool: Message) -> Result<()> {
        self.confirmed("load-pool", pool).await
    }

    /// Unloads a virtual IP pool; fails while leases are online.
    pub async fn unload_pool(&self, pool: Message) -> Result<()> {
        self.confirmed("unload-pool", pool).await
    }

    /// Lists loaded pools and their leases.
    pub async fn get_pools(&self, filter: Message) -> Result<Message> {
        self.request("get-pools", filter).await
    }

    /// Lists loaded algorithms and their implementations.
    pub async fn get_algorithms(&self) -> Result<Message> {
        self.request("get-algorithms", Message::new()).await
    }

    /// Returns global or connection-specific IKE event counters.
    pub async fn get_counters(&self, filter: Message) -> Result<Message> {
        self.request("get-counters", filter).await
    }

    /// Resets global or connection-specific IKE event counters.
    pub async fn reset_counters(&self, filter: Message) -> Result<()> {
        self.confirmed("reset-counters", filter).await
    }

    async fn confirmed(&self, command: &str, message: Message) -> Result<()> {
        let reply = self.request(command, message).await?;
        check_success(command, &reply)
    }

    async fn collect_streamed(
        &self,
        command: &str,
        event: &str,
        message: Message,
    ) -> Result<Vec<Message>> {
        let mut items = Vec::new();
        self.streamed_request(command, event, message, |item| items.push(item))
            .await?;
        Ok(items)
    }
}

/// Replies to imperative commands carry `success = yes|no` and, on
/// failure, an `errmsg` scalar.
fn check_success(command: &str, reply: &Message) -> Result<()> {
    match reply.get_str("success") {
        Some("yes") | None => Ok(()),
        _ => Err(Error::command(
            command,
            reply.get_str("errmsg").unwrap_or("unspecified failure"),
        )),
    }
}
