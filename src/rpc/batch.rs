//! Batch Executor - chunked JSON-RPC eth_call batching
//!
//! Turns a list of logical contract calls into JSON-RPC 2.0 array
//! requests: chunks of at most `chunk_size` calls, ids equal to the
//! intra-chunk index, one POST per chunk. Responses are matched back
//! to calls BY ID, not by array position - providers are free to
//! reorder batch entries.
//!
//! Failure scoping:
//! - A bad individual entry (RPC error object, malformed hex) fails
//!   that call only.
//! - A transport failure (non-2xx, network error, malformed JSON body)
//!   fails every call in that chunk; other chunks proceed.
//! - No retry at this layer - the rate limiter wraps each POST and
//!   owns backoff for throttled dispatches.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::RateLimiter;

/// Timeout for a single batch POST.
const HTTP_TIMEOUT_SECS: u64 = 20;

// ============================================
// TYPES
// ============================================

/// One logical eth_call: target contract + ABI-encoded calldata.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub target: Address,
    pub calldata: Vec<u8>,
}

/// Per-call result, same length and order as the input call list.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success(Vec<u8>),
    Failure(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            CallOutcome::Success(bytes) => Some(bytes),
            CallOutcome::Failure(_) => None,
        }
    }
}

// ============================================
// WIRE FORMAT
// ============================================

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: usize,
    method: &'static str,
    params: (CallParams, &'static str),
}

#[derive(Debug, Serialize)]
struct CallParams {
    to: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<u64>,
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn build_payload(chunk: &[BatchCall]) -> Vec<RpcRequest> {
    chunk
        .iter()
        .enumerate()
        .map(|(id, call)| RpcRequest {
            jsonrpc: "2.0",
            id,
            method: "eth_call",
            params: (
                CallParams {
                    to: format!("{:?}", call.target),
                    data: format!("0x{}", hex::encode(&call.calldata)),
                },
                "latest",
            ),
        })
        .collect()
}

/// Match response entries back to the chunk's calls by id. Unknown and
/// duplicate ids are ignored; calls with no response entry fail.
fn match_by_id(chunk_len: usize, items: Vec<RpcResponse>) -> Vec<CallOutcome> {
    let mut outcomes: Vec<Option<CallOutcome>> = vec![None; chunk_len];

    for item in items {
        let idx = match item.id {
            Some(id) if (id as usize) < chunk_len => id as usize,
            _ => continue,
        };
        if outcomes[idx].is_some() {
            continue;
        }
        outcomes[idx] = Some(match (item.result, item.error) {
            (_, Some(err)) => CallOutcome::Failure(format!("RPC error {}: {}", err.code, err.message)),
            (Some(hex_data), None) => match decode_hex(&hex_data) {
                Ok(bytes) => CallOutcome::Success(bytes),
                Err(e) => CallOutcome::Failure(e),
            },
            (None, None) => CallOutcome::Failure("empty response entry".to_string()),
        });
    }

    outcomes
        .into_iter()
        .map(|o| o.unwrap_or_else(|| CallOutcome::Failure("no response for id".to_string())))
        .collect()
}

fn decode_hex(data: &str) -> Result<Vec<u8>, String> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| format!("invalid hex result: {}", e))
}

// ============================================
// EXECUTOR
// ============================================

pub struct BatchExecutor {
    client: reqwest::Client,
    url: String,
    chunk_size: usize,
    limiter: Arc<RateLimiter>,
}

impl BatchExecutor {
    pub fn new(url: String, chunk_size: usize, limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url,
            chunk_size: chunk_size.max(1),
            limiter,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Point the executor at a different endpoint (failover).
    pub fn set_url(&mut self, url: String) {
        self.url = url;
    }

    /// Execute all calls, one POST per chunk. The returned vector has
    /// the same length and order as `calls`.
    pub async fn execute(&self, calls: &[BatchCall]) -> Vec<CallOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());

        for chunk in calls.chunks(self.chunk_size) {
            match self.post_chunk(chunk).await {
                Ok(items) => outcomes.extend(match_by_id(chunk.len(), items)),
                Err(err) => {
                    warn!("Batch chunk of {} calls failed: {}", chunk.len(), err);
                    let msg = format!("transport: {}", err);
                    outcomes.extend(std::iter::repeat_with(|| CallOutcome::Failure(msg.clone())).take(chunk.len()));
                }
            }
        }

        debug!(
            "Batch executed: {} calls, {} ok",
            calls.len(),
            outcomes.iter().filter(|o| o.is_success()).count()
        );
        outcomes
    }

    async fn post_chunk(&self, chunk: &[BatchCall]) -> Result<Vec<RpcResponse>> {
        let payload = build_payload(chunk);

        self.limiter
            .execute(|| {
                let payload = &payload;
                async move {
                    let response = self.client.post(&self.url).json(payload).send().await?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(eyre!("RPC returned {}: {}", status, body));
                    }

                    let items: Vec<RpcResponse> = response.json().await?;
                    Ok(items)
                }
            })
            .await
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn call(data: &[u8]) -> BatchCall {
        BatchCall {
            target: address!("cA11bde05977b3631167028862bE2a173976CA11"),
            calldata: data.to_vec(),
        }
    }

    fn ok_item(id: u64, result: &str) -> RpcResponse {
        RpcResponse {
            jsonrpc: Some("2.0".to_string()),
            id: Some(id),
            result: Some(result.to_string()),
            error: None,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = build_payload(&[call(&[0xab]), call(&[0xcd])]);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json[0]["jsonrpc"], "2.0");
        assert_eq!(json[0]["id"], 0);
        assert_eq!(json[1]["id"], 1);
        assert_eq!(json[0]["method"], "eth_call");
        assert_eq!(json[0]["params"][0]["data"], "0xab");
        assert_eq!(json[0]["params"][1], "latest");
    }

    #[test]
    fn test_match_tolerates_out_of_order_ids() {
        let items = vec![ok_item(2, "0x03"), ok_item(0, "0x01"), ok_item(1, "0x02")];
        let outcomes = match_by_id(3, items);

        assert_eq!(outcomes[0].data(), Some(&[0x01][..]));
        assert_eq!(outcomes[1].data(), Some(&[0x02][..]));
        assert_eq!(outcomes[2].data(), Some(&[0x03][..]));
    }

    #[test]
    fn test_single_bad_entry_does_not_fail_chunk() {
        let items = vec![
            ok_item(0, "0x01"),
            RpcResponse {
                jsonrpc: None,
                id: Some(1),
                result: None,
                error: Some(RpcError {
                    code: -32000,
                    message: "execution reverted".to_string(),
                }),
            },
            ok_item(2, "0xzz"), // malformed hex
        ];
        let outcomes = match_by_id(3, items);

        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert!(!outcomes[2].is_success());
    }

    #[test]
    fn test_missing_and_unknown_ids() {
        // id 5 is outside the chunk, id 1 never answered
        let items = vec![ok_item(0, "0x01"), ok_item(5, "0xff")];
        let outcomes = match_by_id(2, items);

        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let items = vec![ok_item(0, "0x01"), ok_item(0, "0x02")];
        let outcomes = match_by_id(1, items);
        assert_eq!(outcomes[0].data(), Some(&[0x01][..]));
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("0x").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_hex("0xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(decode_hex("0xzz").is_err());
    }
}
