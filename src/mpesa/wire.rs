//! Exact wire shapes of the Daraja callbacks.
//!
//! Field names match the provider byte-for-byte. Decoding is deliberately
//! lenient about scalar types (the gateway mixes numbers and strings for
//! amounts, phone numbers and result codes across environments); a payload
//! that cannot be decoded at all is a `MalformedPayload`, never a panic.

use crate::mpesa::error::{MpesaError, MpesaResult};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// `Body.stkCallback` envelope delivered to the reconcile and timeout
/// actions.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode", deserialize_with = "lenient_i64")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<JsonValue>,
}

impl CallbackMetadata {
    /// `{Name: Value}` projection of the item list.
    pub fn flatten(&self) -> HashMap<String, JsonValue> {
        self.item
            .iter()
            .filter_map(|item| {
                item.value
                    .as_ref()
                    .map(|value| (item.name.clone(), value.clone()))
            })
            .collect()
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.named_string("MpesaReceiptNumber")
    }

    pub fn phone_number(&self) -> Option<String> {
        self.named_string("PhoneNumber")
    }

    fn named_string(&self, name: &str) -> Option<String> {
        self.item
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
            .map(scalar_to_string)
    }
}

/// C2B confirmation/validation payload.
#[derive(Debug, Clone, Deserialize)]
pub struct C2bConfirmation {
    #[serde(rename = "TransID", default)]
    pub trans_id: String,
    #[serde(rename = "TransTime", default, deserialize_with = "lenient_opt_string")]
    pub trans_time: Option<String>,
    #[serde(rename = "TransAmount", deserialize_with = "lenient_f64")]
    pub trans_amount: f64,
    #[serde(rename = "BillRefNumber", default, deserialize_with = "lenient_opt_string")]
    pub bill_ref_number: Option<String>,
    #[serde(rename = "MSISDN", default, deserialize_with = "lenient_opt_string")]
    pub msisdn: Option<String>,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "MiddleName", default)]
    pub middle_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
}

impl C2bConfirmation {
    /// Metadata projection handed to the external notifier, mirroring the
    /// reconcile metadata keys.
    pub fn notification_metadata(&self) -> HashMap<String, JsonValue> {
        let mut parsed = HashMap::new();
        parsed.insert("Amount".to_string(), JsonValue::from(self.trans_amount));
        parsed.insert(
            "MpesaReceiptNumber".to_string(),
            JsonValue::from(self.trans_id.clone()),
        );
        if let Some(time) = &self.trans_time {
            parsed.insert("TransactionDate".to_string(), JsonValue::from(time.clone()));
        }
        if let Some(msisdn) = &self.msisdn {
            parsed.insert("PhoneNumber".to_string(), JsonValue::from(msisdn.clone()));
        }
        parsed
    }
}

/// `Result` envelope delivered after a reversal or status query.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "Result")]
    pub result: ResultBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBody {
    #[serde(rename = "ResultType", default, deserialize_with = "lenient_opt_i64")]
    pub result_type: Option<i64>,
    #[serde(rename = "ResultCode", deserialize_with = "lenient_i64")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
    #[serde(rename = "ResultParameters", default)]
    pub result_parameters: Option<ResultParametersOuter>,
    #[serde(rename = "ReferenceData", default)]
    pub reference_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultParametersOuter {
    #[serde(rename = "ResultParameters", default)]
    pub result_parameters: Option<ResultParametersInner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultParametersInner {
    #[serde(rename = "ResultParameter", default)]
    pub result_parameter: Vec<CallbackItem>,
}

impl ResultBody {
    /// Each named result parameter, keyed by its `Name` field.
    pub fn parameters_by_name(&self) -> HashMap<String, JsonValue> {
        self.result_parameters
            .as_ref()
            .and_then(|outer| outer.result_parameters.as_ref())
            .map(|inner| {
                inner
                    .result_parameter
                    .iter()
                    .filter_map(|item| {
                        item.value
                            .as_ref()
                            .map(|value| (item.name.clone(), value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn decode_stk_callback(body: &str) -> MpesaResult<StkCallback> {
    let envelope: StkCallbackEnvelope =
        serde_json::from_str(body).map_err(|e| MpesaError::MalformedPayload {
            message: format!("invalid stkCallback payload: {}", e),
        })?;
    Ok(envelope.body.stk_callback)
}

pub fn decode_confirmation(body: &str) -> MpesaResult<C2bConfirmation> {
    serde_json::from_str(body).map_err(|e| MpesaError::MalformedPayload {
        message: format!("invalid C2B confirmation payload: {}", e),
    })
}

pub fn decode_result(body: &str) -> MpesaResult<ResultBody> {
    let envelope: ResultEnvelope =
        serde_json::from_str(body).map_err(|e| MpesaError::MalformedPayload {
            message: format!("invalid Result payload: {}", e),
        })?;
    Ok(envelope.result)
}

pub fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    value_as_i64(&value).ok_or_else(|| serde::de::Error::custom("expected an integer result code"))
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    match &value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom("expected a numeric amount"))
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.map(|v| scalar_to_string(&v)))
}

fn value_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
