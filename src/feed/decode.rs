//! Binance trade payload decoding
//!
//! Accepts combined-stream frames (`{"stream": "...", "data": {...}}`), raw
//! single-stream events, and subscription acks. Trade events are validated
//! and normalized into [`Tick`]; anything else is rejected with a
//! [`DecodeError`].

use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::types::{normalize_symbol, Tick};

/// Outcome of decoding one text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Tick(Tick),
    /// Subscription ack or other non-market frame
    Control,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Combined {
        #[allow(dead_code)]
        stream: String,
        data: Value,
    },
    Ack {
        #[allow(dead_code)]
        id: Value,
        #[serde(default)]
        #[allow(dead_code)]
        result: Value,
    },
    Event(Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum StreamEvent {
    #[serde(rename = "trade")]
    Trade(RawTrade),
    #[serde(rename = "aggTrade")]
    AggTrade(RawAggTrade),
}

const SUPPORTED_EVENTS: [&str; 2] = ["trade", "aggTrade"];

/// Binance sends decimals as strings; accept bare numbers too
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumField {
    Text(String),
    Num(f64),
}

impl NumField {
    fn parse(&self, field: &'static str) -> Result<f64, DecodeError> {
        match self {
            NumField::Num(v) => Ok(*v),
            NumField::Text(raw) => raw.trim().parse().map_err(|_| DecodeError::InvalidNumber {
                field,
                raw: raw.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: Option<u64>,
    #[serde(rename = "p")]
    price: NumField,
    #[serde(rename = "q")]
    quantity: NumField,
    #[serde(rename = "T")]
    trade_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    agg_id: Option<u64>,
    #[serde(rename = "p")]
    price: NumField,
    #[serde(rename = "q")]
    quantity: NumField,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Decode one websocket text frame
pub fn decode_frame(text: &str) -> Result<Decoded, DecodeError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let payload = match frame {
        Frame::Combined { data, .. } => data,
        Frame::Ack { .. } => return Ok(Decoded::Control),
        Frame::Event(value) => value,
    };

    let kind = payload
        .get("e")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing event type".to_string()))?;
    if !SUPPORTED_EVENTS.contains(&kind) {
        return Err(DecodeError::Unsupported(kind.to_string()));
    }

    let event: StreamEvent =
        serde_json::from_value(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let tick = match event {
        StreamEvent::Trade(raw) => validate(
            &raw.symbol,
            raw.price.parse("price")?,
            raw.quantity.parse("quantity")?,
            raw.trade_time,
            raw.trade_id,
        )?,
        StreamEvent::AggTrade(raw) => validate(
            &raw.symbol,
            raw.price.parse("price")?,
            raw.quantity.parse("quantity")?,
            raw.trade_time,
            raw.agg_id,
        )?,
    };
    Ok(Decoded::Tick(tick))
}

fn validate(
    symbol: &str,
    price: f64,
    quantity: f64,
    event_time: i64,
    trade_id: Option<u64>,
) -> Result<Tick, DecodeError> {
    let symbol = normalize_symbol(symbol);
    if symbol.is_empty() {
        return Err(DecodeError::EmptySymbol);
    }
    if !(price.is_finite() && price > 0.0) {
        return Err(DecodeError::NonPositivePrice(price));
    }
    if !(quantity.is_finite() && quantity >= 0.0) {
        return Err(DecodeError::NegativeQuantity(quantity));
    }
    if event_time <= 0 {
        return Err(DecodeError::InvalidTimestamp(event_time));
    }

    let tick = Tick::new(&symbol, price, quantity, event_time);
    Ok(match trade_id {
        Some(id) => tick.with_trade_id(id),
        None => tick,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_json(price: &str, qty: &str, ts: i64) -> Value {
        serde_json::json!({
            "e": "trade",
            "E": ts + 3,
            "T": ts,
            "s": "BTCUSDT",
            "t": 4_200_001u64,
            "p": price,
            "q": qty,
            "X": "MARKET",
            "m": true
        })
    }

    fn expect_tick(decoded: Decoded) -> Tick {
        match decoded {
            Decoded::Tick(tick) => tick,
            other => panic!("expected tick, got {:?}", other),
        }
    }

    #[test]
    fn decodes_combined_trade_frame() {
        let frame = serde_json::json!({
            "stream": "btcusdt@trade",
            "data": trade_json("37000.50", "0.012", 1_700_000_000_123),
        });
        let tick = expect_tick(decode_frame(&frame.to_string()).unwrap());
        assert_eq!(tick.symbol, "btcusdt");
        assert_eq!(tick.price, 37_000.5);
        assert_eq!(tick.quantity, 0.012);
        assert_eq!(tick.event_time, 1_700_000_000_123);
        assert_eq!(tick.trade_id, Some(4_200_001));
    }

    #[test]
    fn decodes_raw_trade_event() {
        let text = trade_json("2000", "1", 1_700_000_000_000).to_string();
        let tick = expect_tick(decode_frame(&text).unwrap());
        assert_eq!(tick.price, 2000.0);
    }

    #[test]
    fn decodes_agg_trade_with_numeric_fields() {
        let text = serde_json::json!({
            "e": "aggTrade",
            "s": "ethusdt",
            "a": 99u64,
            "p": 3100.25,
            "q": 2.0,
            "T": 1_700_000_000_500i64
        })
        .to_string();
        let tick = expect_tick(decode_frame(&text).unwrap());
        assert_eq!(tick.symbol, "ethusdt");
        assert_eq!(tick.trade_id, Some(99));
    }

    #[test]
    fn subscription_ack_is_control() {
        assert_eq!(
            decode_frame(r#"{"result":null,"id":1}"#).unwrap(),
            Decoded::Control
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode_frame("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"p":"1"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unsupported_events() {
        let text = r#"{"e":"depthUpdate","s":"BTCUSDT"}"#;
        assert_eq!(
            decode_frame(text),
            Err(DecodeError::Unsupported("depthUpdate".to_string()))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let bad_price = trade_json("abc", "1", 1).to_string();
        assert!(matches!(
            decode_frame(&bad_price),
            Err(DecodeError::InvalidNumber { field: "price", .. })
        ));

        let zero_price = trade_json("0", "1", 1).to_string();
        assert!(matches!(
            decode_frame(&zero_price),
            Err(DecodeError::NonPositivePrice(_))
        ));

        let negative_qty = trade_json("10", "-1", 1).to_string();
        assert!(matches!(
            decode_frame(&negative_qty),
            Err(DecodeError::NegativeQuantity(_))
        ));

        let bad_time = trade_json("10", "1", 0).to_string();
        assert_eq!(decode_frame(&bad_time), Err(DecodeError::InvalidTimestamp(0)));
    }

    #[test]
    fn rejects_empty_symbol() {
        let mut payload = trade_json("10", "1", 5);
        payload["s"] = Value::String("  ".to_string());
        assert_eq!(
            decode_frame(&payload.to_string()),
            Err(DecodeError::EmptySymbol)
        );
    }
}
