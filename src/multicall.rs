use crate::contracts::Api3ServerV1;
use anyhow::Result;
use async_trait::async_trait;
use ethers::prelude::*;
use log::debug;
use std::sync::Arc;

/// Per-call outcome of one `tryMulticall`, index-aligned with the submitted calldatas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TryMulticallOutcome {
    pub successes: Vec<bool>,
    pub returndata: Vec<Bytes>,
}

impl TryMulticallOutcome {
    /// Return data of call `index` if it succeeded. Missing entries count as failures.
    pub fn success_at(&self, index: usize) -> Option<&Bytes> {
        match self.successes.get(index) {
            Some(true) => self.returndata.get(index),
            _ => None,
        }
    }

    /// Raw return data of call `index`, useful to log revert reasons.
    pub fn returndata_at(&self, index: usize) -> Option<&Bytes> {
        self.returndata.get(index)
    }
}

/// Read access to an `Api3ServerV1` deployment on one chain.
///
/// The host supplies one reader per chain provider; the engine only ever issues
/// static `tryMulticall` reads through it and never sends transactions.
#[async_trait]
pub trait DataFeedReader: Send + Sync {
    async fn try_multicall(&self, server: Address, calldatas: Vec<Bytes>) -> Result<TryMulticallOutcome>;
}

/// [`DataFeedReader`] over any `ethers` middleware.
///
/// ## Example
///
/// ```rust,ignore
/// let provider = Arc::new(Provider::<Http>::try_from("http://127.0.0.1:8545")?);
/// let reader = EthersDataFeedReader::new(provider);
/// let outcome = reader.try_multicall(server, vec![calldata]).await?;
/// ```
#[derive(Debug, Clone)]
pub struct EthersDataFeedReader<M: Middleware> {
    pub provider: Arc<M>,
}

impl<M: Middleware + 'static> EthersDataFeedReader<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<M: Middleware + 'static> DataFeedReader for EthersDataFeedReader<M> {
    async fn try_multicall(&self, server: Address, calldatas: Vec<Bytes>) -> Result<TryMulticallOutcome> {
        let call_count = calldatas.len();
        let contract = Api3ServerV1::new(server, Arc::clone(&self.provider));
        // static call from the zero address, nothing is signed or sent
        let (successes, returndata) = contract
            .try_multicall(calldatas)
            .from(Address::zero())
            .call()
            .await
            .map_err(|e| anyhow::anyhow!("tryMulticall on {:?} failed: {}", server, e))?;
        debug!(
            "tryMulticall on {:?}: {}/{} calls succeeded",
            server,
            successes.iter().filter(|s| **s).count(),
            call_count
        );
        Ok(TryMulticallOutcome {
            successes,
            returndata,
        })
    }
}
