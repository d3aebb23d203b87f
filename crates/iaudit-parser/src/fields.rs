use rust_decimal::Decimal;

/// The canonical field set a handler extracts from an envelope (§4.C's
/// `rawdata_kwargs`). Passed straight into `Store::create_raw`.
#[derive(Debug, Clone)]
pub struct RawFields {
    pub deployment: String,
    pub when: Decimal,
    pub host: String,
    pub service: String,
    pub routing_key: String,
    pub json: String,
    pub event: String,
    pub instance_id: Option<String>,
    pub request_id: Option<String>,
    pub state: Option<String>,
    pub old_task: Option<String>,
}
