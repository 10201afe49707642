use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;

use super::types::{
    Account, AuditEntry, BookRecord, DocumentVersion, Holding, MarketSnapshot, RecordKind,
    Transaction,
};

/// Read-only view over one raw JSON object. Every lookup accepts the canonical
/// snake_case key first and the camelCase spelling used by upstream extractors
/// second.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(value: &'a Value) -> Result<Self, String> {
        match value {
            Value::Object(obj) => Ok(Self { obj }),
            other => Err(format!("expected an object, got {}", json_type(other))),
        }
    }

    fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.obj.get(*k))
            .find(|v| !v.is_null())
    }

    fn required(&self, keys: &[&str]) -> Result<&'a Value, String> {
        self.get(keys)
            .ok_or_else(|| format!("missing field '{}'", keys[0]))
    }

    fn required_str(&self, keys: &[&str]) -> Result<String, String> {
        match self.required(keys)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::String(_) => Err(format!("field '{}' is empty", keys[0])),
            // Ids frequently arrive as bare numbers
            Value::Number(n) => Ok(n.to_string()),
            other => Err(format!(
                "field '{}' must be a string, got {}",
                keys[0],
                json_type(other)
            )),
        }
    }

    fn optional_str(&self, keys: &[&str]) -> Result<Option<String>, String> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(_) => self.required_str(keys).map(Some),
        }
    }

    fn required_decimal(&self, keys: &[&str]) -> Result<BigDecimal, String> {
        parse_decimal(self.required(keys)?).map_err(|e| format!("field '{}': {}", keys[0], e))
    }

    fn required_timestamp(&self, keys: &[&str]) -> Result<DateTime<Utc>, String> {
        parse_timestamp(self.required(keys)?).map_err(|e| format!("field '{}': {}", keys[0], e))
    }

    fn optional_timestamp(&self, keys: &[&str]) -> Result<Option<DateTime<Utc>>, String> {
        match self.get(keys) {
            None => Ok(None),
            Some(_) => self.required_timestamp(keys).map(Some),
        }
    }

    fn optional_f64(&self, keys: &[&str]) -> Result<Option<f64>, String> {
        let Some(value) = self.get(keys) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(format!("field '{}' must be a finite number", keys[0])),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Longest numeric text accepted, separators removed.
const MAX_DECIMAL_LEN: usize = 64;
/// Largest power of ten, either way, a decimal may carry.
const MAX_DECIMAL_EXPONENT: i64 = 64;

/// Parse a JSON number or numeric string into an exact decimal.
/// Accepts surrounding whitespace, a leading `+` and `,` thousands separators.
/// Values with more digits or a larger exponent than any ledger amount are
/// rejected, since rescaling them is unbounded work.
pub fn parse_decimal(value: &Value) -> Result<BigDecimal, String> {
    let text = match value {
        // serde_json prints the shortest representation, so 0.1 stays "0.1"
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.strip_prefix('+').unwrap_or(trimmed).replace(',', "")
        }
        other => return Err(format!("expected a number, got {}", json_type(other))),
    };

    if text.is_empty() {
        return Err("empty amount".to_string());
    }

    if text.len() > MAX_DECIMAL_LEN {
        return Err(format!("amount of {} characters is out of range", text.len()));
    }

    let amount =
        BigDecimal::from_str(&text).map_err(|_| format!("'{}' is not a finite decimal", text))?;
    let (_, exponent) = amount.as_bigint_and_exponent();
    if exponent.unsigned_abs() > MAX_DECIMAL_EXPONENT.unsigned_abs() {
        return Err(format!("'{}' is out of range", text));
    }
    Ok(amount)
}

/// Parse a timestamp. Naive forms are taken as UTC.
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => parse_timestamp_str(s.trim()),
        other => return Err(format!("expected a timestamp, got {}", json_type(other))),
    };
    parsed.ok_or_else(|| format!("unparsable timestamp {}", value))
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    // CSV exports carry epoch seconds as text
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0));
    }
    None
}

fn round_amount(amount: BigDecimal, scale: i64) -> BigDecimal {
    amount.with_scale_round(scale, RoundingMode::HalfEven)
}

/// Best-effort identifier for error reports, read before full decoding.
pub fn record_id(value: &Value, kind: RecordKind) -> Option<String> {
    let keys: &[&str] = match kind {
        RecordKind::Account => &["account_id", "accountId"],
        RecordKind::Transaction => &["id", "transaction_id", "transactionId"],
        RecordKind::BookRecord => &["reference", "id"],
        RecordKind::Holding | RecordKind::MarketSnapshot => &["symbol"],
        RecordKind::AuditEntry => {
            &["transaction_id", "transactionId", "document_ref", "documentRef"]
        }
        RecordKind::DocumentVersion => &["document_ref", "documentRef"],
    };
    let fields = Fields::new(value).ok()?;
    fields.required_str(keys).ok()
}

pub fn decode_transaction(value: &Value, amount_scale: i64) -> Result<Transaction, String> {
    let f = Fields::new(value)?;
    let id = f.required_str(&["id", "transaction_id", "transactionId"])?;
    let account_id = f.required_str(&["account_id", "accountId"])?;
    let timestamp = f.required_timestamp(&["timestamp", "date"])?;
    let amount = round_amount(f.required_decimal(&["amount"])?, amount_scale);
    let description = f.required_str(&["description"])?;
    let merchant = f
        .optional_str(&["merchant"])?
        .unwrap_or_else(|| description.clone());
    let category = f
        .optional_str(&["category"])?
        .unwrap_or_else(|| "uncategorized".to_string());

    Ok(Transaction {
        id,
        account_id,
        timestamp,
        amount,
        description,
        merchant,
        category,
    })
}

pub fn decode_book_record(value: &Value, amount_scale: i64) -> Result<BookRecord, String> {
    let f = Fields::new(value)?;
    Ok(BookRecord {
        reference: f.required_str(&["reference", "id"])?,
        account_id: f.required_str(&["account_id", "accountId"])?,
        timestamp: f.required_timestamp(&["timestamp", "date"])?,
        amount: round_amount(f.required_decimal(&["amount"])?, amount_scale),
    })
}

pub fn decode_account(value: &Value, amount_scale: i64) -> Result<Account, String> {
    let f = Fields::new(value)?;
    Ok(Account {
        account_id: f.required_str(&["account_id", "accountId"])?,
        account_type: f.required_str(&["account_type", "accountType", "type"])?,
        current_balance: round_amount(
            f.required_decimal(&["current_balance", "currentBalance"])?,
            amount_scale,
        ),
        available_balance: round_amount(
            f.required_decimal(&["available_balance", "availableBalance"])?,
            amount_scale,
        ),
        snapshot_time: f.required_timestamp(&["snapshot_time", "snapshotTime"])?,
    })
}

pub fn decode_holding(value: &Value, amount_scale: i64) -> Result<Holding, String> {
    let f = Fields::new(value)?;
    Ok(Holding {
        portfolio_id: f
            .optional_str(&["portfolio_id", "portfolioId"])?
            .unwrap_or_else(|| "default".to_string()),
        symbol: f.required_str(&["symbol"])?.to_uppercase(),
        quantity: f.required_decimal(&["quantity"])?,
        cost_basis: round_amount(
            f.required_decimal(&["cost_basis", "costBasis"])?,
            amount_scale,
        ),
    })
}

pub fn decode_market_snapshot(value: &Value) -> Result<MarketSnapshot, String> {
    let f = Fields::new(value)?;
    let price = f.required_decimal(&["price"])?;
    if price < BigDecimal::from(0) {
        return Err(format!("negative price {}", price));
    }
    Ok(MarketSnapshot {
        symbol: f.required_str(&["symbol"])?.to_uppercase(),
        price,
        beta: f.optional_f64(&["beta", "volatility"])?.unwrap_or(1.0),
        rate_sensitivity: f
            .optional_f64(&["rate_sensitivity", "rateSensitivity"])?
            .unwrap_or(0.0),
        as_of: f.optional_timestamp(&["as_of", "asOf"])?,
    })
}

pub fn decode_audit_entry(value: &Value) -> Result<AuditEntry, String> {
    let f = Fields::new(value)?;
    let transaction_id = f.optional_str(&["transaction_id", "transactionId"])?;
    let document_ref = f.optional_str(&["document_ref", "documentRef"])?;
    if transaction_id.is_none() && document_ref.is_none() {
        return Err("missing field 'transaction_id' (or 'document_ref')".to_string());
    }
    Ok(AuditEntry {
        transaction_id,
        account_id: f.optional_str(&["account_id", "accountId"])?,
        document_ref,
        version: f.optional_str(&["version"])?,
        actor_id: f.required_str(&["actor_id", "actorId"])?,
        action: f.required_str(&["action"])?.to_lowercase(),
        timestamp: f.required_timestamp(&["timestamp"])?,
    })
}

pub fn decode_document_version(value: &Value) -> Result<DocumentVersion, String> {
    let f = Fields::new(value)?;
    Ok(DocumentVersion {
        document_ref: f.required_str(&["document_ref", "documentRef"])?,
        version: f.required_str(&["version"])?,
        observed_at: f.required_timestamp(&["observed_at", "observedAt", "timestamp"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_transaction_defaults() {
        let tx = decode_transaction(
            &json!({
                "id": "t1",
                "accountId": "acc-1",
                "timestamp": "2024-01-01T10:15:00Z",
                "amount": "1,250.455",
                "description": "COFFEE SHOP 42"
            }),
            2,
        )
        .unwrap();
        assert_eq!(tx.account_id, "acc-1");
        assert_eq!(tx.amount, BigDecimal::from_str("1250.46").unwrap());
        assert_eq!(tx.merchant, "COFFEE SHOP 42");
        assert_eq!(tx.category, "uncategorized");
    }

    #[test]
    fn test_amount_rounding_is_half_even() {
        let tx = decode_transaction(
            &json!({
                "id": 7, "account_id": "a", "timestamp": "2024-01-01",
                "amount": 0.125, "description": "x"
            }),
            2,
        )
        .unwrap();
        assert_eq!(tx.id, "7");
        assert_eq!(tx.amount, BigDecimal::from_str("0.12").unwrap());
    }

    #[test]
    fn test_rejects_bad_amounts() {
        for bad in [json!("NaN"), json!("inf"), json!("abc"), json!(""), json!(true)] {
            assert!(parse_decimal(&bad).is_err(), "accepted {bad}");
        }
        assert_eq!(parse_decimal(&json!("+5")).unwrap(), BigDecimal::from(5));
        assert_eq!(parse_decimal(&json!(-50)).unwrap(), BigDecimal::from(-50));
    }

    #[test]
    fn test_rejects_out_of_range_amounts() {
        let long = "9".repeat(80);
        for bad in ["1e400000000", "1e-400000000", "9E+65", long.as_str()] {
            let err = parse_decimal(&json!(bad)).unwrap_err();
            assert!(err.contains("out of range"), "{bad}: {err}");
        }

        let err = decode_transaction(
            &json!({
                "id": "t", "account_id": "a", "timestamp": "2024-01-01",
                "amount": "1e400000000", "description": "d"
            }),
            2,
        )
        .unwrap_err();
        assert!(err.contains("out of range"));

        assert_eq!(parse_decimal(&json!("1.5e3")).unwrap(), BigDecimal::from(1500));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        for input in [
            json!("2024-01-02T03:04:05Z"),
            json!("2024-01-02T05:04:05+02:00"),
            json!("2024-01-02T03:04:05"),
            json!("2024-01-02 03:04:05"),
            json!(1704164645),
            json!("1704164645"),
        ] {
            assert_eq!(parse_timestamp(&input).unwrap(), expected, "input {input}");
        }
        assert!(parse_timestamp(&json!("02/01/2024")).is_err());
        assert_eq!(
            parse_timestamp(&json!("2024-01-02")).unwrap().to_rfc3339(),
            "2024-01-02T00:00:00+00:00"
        );
    }

    #[test]
    fn test_missing_and_empty_fields() {
        let err = decode_book_record(
            &json!({"reference": "b1", "account_id": "a", "amount": "10"}),
            2,
        )
        .unwrap_err();
        assert_eq!(err, "missing field 'timestamp'");

        let err = decode_transaction(
            &json!({
                "id": " ", "account_id": "a", "timestamp": "2024-01-01",
                "amount": 1, "description": "d"
            }),
            2,
        )
        .unwrap_err();
        assert_eq!(err, "field 'id' is empty");

        assert!(decode_book_record(&json!([1, 2]), 2).is_err());
    }

    #[test]
    fn test_audit_entry_needs_a_subject() {
        let err = decode_audit_entry(&json!({
            "actor_id": "u1", "action": "view", "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap_err();
        assert!(err.contains("transaction_id"));

        let entry = decode_audit_entry(&json!({
            "documentRef": "stmt-1", "version": "v2", "actorId": "u1",
            "action": "APPROVE", "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(entry.action, "approve");
        assert_eq!(entry.document_ref.as_deref(), Some("stmt-1"));
    }

    #[test]
    fn test_snapshot_defaults_and_bad_beta() {
        let snap = decode_market_snapshot(&json!({"symbol": "acme", "price": "100"})).unwrap();
        assert_eq!(snap.symbol, "ACME");
        assert_eq!(snap.beta, 1.0);
        assert_eq!(snap.rate_sensitivity, 0.0);

        let bad_beta = json!({"symbol": "X", "price": 1, "beta": "high"});
        assert!(decode_market_snapshot(&bad_beta).is_err());
        assert!(decode_market_snapshot(&json!({"symbol": "X", "price": -1})).is_err());
    }
}
