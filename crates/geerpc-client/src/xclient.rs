//! The multi-server client.
//!
//! [`XClient`] wraps a [`Discovery`] and a per-address cache of connected
//! clients. Single calls go to one discovered server; [`XClient::broadcast`]
//! fans a call out to every discovered server at once.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, Mutex};

use geerpc_common::{Options, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

/// A client that fans calls out across the servers a [`Discovery`] knows.
pub struct XClient<D: Discovery> {
    discovery: D,
    mode: SelectMode,
    opt: Options,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

struct BroadcastState<R> {
    reply: Option<R>,
    error: Option<RpcError>,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, opt: Options) -> Self {
        Self {
            discovery,
            mode,
            opt,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped discovery, e.g. for manual `update` calls.
    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Closes every cached client.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            client.close().await;
        }
    }

    /// Returns the cached client for an address if it is still usable,
    /// otherwise discards the stale entry and dials fresh.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(client.clone());
            }
            client.close().await;
            clients.remove(rpc_addr);
        }
        let client = Arc::new(Client::xdial(rpc_addr, self.opt.clone()).await?);
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    async fn call_addr<A, R>(&self, rpc_addr: &str, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let client = self.dial(rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Invokes a method on one server picked by the discovery.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        self.call_addr(&rpc_addr, service_method, args).await
    }

    /// Invokes a method on every discovered server in parallel.
    ///
    /// The first successful reply is written into `reply`; later successes
    /// are ignored. The first error is retained and aborts the remaining
    /// sibling calls early. Returns once every branch has completed, with
    /// the retained error if there was one.
    pub async fn broadcast<A, R>(
        &self,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let servers = self.discovery.get_all().await?;

        let shared = Mutex::new(BroadcastState::<R> {
            reply: None,
            error: None,
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let branches = servers.iter().map(|rpc_addr| {
            let mut cancelled = cancel_rx.clone();
            let shared = &shared;
            let cancel_tx = &cancel_tx;
            async move {
                let result = tokio::select! {
                    result = self.call_addr::<A, R>(rpc_addr, service_method, args) => result,
                    _ = cancelled.changed() => {
                        Err(RpcError::Cancelled("broadcast aborted".to_string()))
                    }
                };

                let mut state = shared.lock().await;
                match result {
                    Ok(value) => {
                        if state.reply.is_none() {
                            state.reply = Some(value);
                        }
                    }
                    Err(err) => {
                        if state.error.is_none() {
                            state.error = Some(err);
                            let _ = cancel_tx.send(true);
                        }
                    }
                }
            }
        });
        futures::future::join_all(branches).await;

        let state = shared.into_inner();
        if let Some(value) = state.reply {
            *reply = value;
        }
        match state.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
