//! Timestream Query client.
//!
//! Implements [`QueryService`] over the Timestream Query JSON API
//! (`application/x-amz-json-1.0`, SigV4 service `timestream`).
//!
//! Timestream requires endpoint discovery: the regional
//! `query.timestream.<region>.amazonaws.com` host only answers
//! `DescribeEndpoints`, which names the cell endpoint that accepts queries.
//! The address is discovered on first use and kept for the life of the
//! client. Setting `query_endpoint` in the config skips discovery.
//!
//! Wire shapes are private to this module and converted into
//! [`crate::models`] types before leaving it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::aws::{self, AwsCredentials, SigningRequest};
use crate::models::{ColumnDescriptor, ColumnKind, Datum, QueryPage, QueryRequest, Row, TimePoint};
use crate::traits::QueryService;

const TARGET_PREFIX: &str = "Timestream_20181101";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "timestream";

/// [`QueryService`] talking to Amazon Timestream.
pub struct TimestreamQueryClient {
    client: reqwest::Client,
    creds: AwsCredentials,
    region: String,
    endpoint: OnceCell<String>,
}

impl TimestreamQueryClient {
    /// Create a client. With `endpoint = None` the query endpoint is
    /// discovered on the first call.
    pub fn new(creds: AwsCredentials, region: impl Into<String>, endpoint: Option<String>) -> Self {
        let cell = match endpoint {
            Some(endpoint) => OnceCell::new_with(Some(endpoint)),
            None => OnceCell::new(),
        };
        Self {
            client: reqwest::Client::new(),
            creds,
            region: region.into(),
            endpoint: cell,
        }
    }

    async fn endpoint(&self) -> Result<&str> {
        let endpoint = self
            .endpoint
            .get_or_try_init(|| self.discover_endpoint())
            .await?;
        Ok(endpoint.as_str())
    }

    async fn discover_endpoint(&self) -> Result<String> {
        let host = format!("query.timestream.{}.amazonaws.com", self.region);
        let body = self.call(&host, "DescribeEndpoints", b"{}".to_vec()).await?;
        let resp: DescribeEndpointsResponse =
            serde_json::from_str(&body).context("Failed to parse DescribeEndpoints response")?;

        let endpoint = resp
            .endpoints
            .into_iter()
            .next()
            .map(|e| e.address)
            .with_context(|| format!("DescribeEndpoints on {} returned no endpoints", host))?;

        tracing::debug!(region = %self.region, endpoint = %endpoint, "discovered query endpoint");
        Ok(endpoint)
    }

    /// POST one signed JSON request and return the response body.
    async fn call(&self, endpoint: &str, operation: &str, payload: Vec<u8>) -> Result<String> {
        let host = aws::endpoint_host(endpoint);
        let url = format!("{}/", aws::endpoint_base_url(endpoint));
        let target = format!("{}.{}", TARGET_PREFIX, operation);

        let signed = aws::sign(
            &self.creds,
            &SigningRequest {
                method: "POST",
                host: &host,
                canonical_uri: "/",
                canonical_query: "",
                headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
                payload: &payload,
                region: &self.region,
                service: SERVICE,
            },
            Utc::now(),
        );

        let mut req_builder = self.client.post(&url).body(payload);
        for (name, value) in &signed.headers {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Timestream {} request to {} failed: {}", operation, host, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Timestream {} failed (HTTP {}): {}",
                operation,
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl QueryService for TimestreamQueryClient {
    async fn query(&self, request: &QueryRequest) -> Result<QueryPage> {
        let endpoint = self.endpoint().await?.to_string();
        let payload = serde_json::to_vec(&WireQueryRequest {
            query_string: &request.query,
            max_rows: request.max_rows,
            next_token: request.next_token.as_deref(),
        })?;

        tracing::debug!(
            endpoint = %endpoint,
            max_rows = request.max_rows,
            continued = request.next_token.is_some(),
            "query page"
        );

        let body = self.call(&endpoint, "Query", payload).await?;
        parse_query_response(&body)
    }
}

// ============ Wire format ============

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireQueryRequest<'a> {
    query_string: &'a str,
    max_rows: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEndpointsResponse {
    #[serde(default)]
    endpoints: Vec<WireEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEndpoint {
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireQueryResponse {
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    column_info: Vec<WireColumnInfo>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRow {
    #[serde(default)]
    data: Vec<WireDatum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDatum {
    scalar_value: Option<String>,
    null_value: Option<bool>,
    array_value: Option<Vec<WireDatum>>,
    row_value: Option<WireRow>,
    time_series_value: Option<Vec<WireTimePoint>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTimePoint {
    time: String,
    value: WireDatum,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireColumnInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "Type")]
    column_type: WireType,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireType {
    scalar_type: Option<String>,
    array_column_info: Option<Box<WireColumnInfo>>,
    row_column_info: Option<Vec<WireColumnInfo>>,
    time_series_measure_value_column_info: Option<Box<WireColumnInfo>>,
}

fn parse_query_response(body: &str) -> Result<QueryPage> {
    let resp: WireQueryResponse =
        serde_json::from_str(body).context("Failed to parse Query response")?;

    let columns = resp
        .column_info
        .into_iter()
        .map(convert_column)
        .collect::<Result<Vec<_>>>()?;
    let rows = resp
        .rows
        .into_iter()
        .map(|row| convert_data(row.data).map(Row::new))
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryPage {
        rows,
        columns,
        next_token: resp.next_token.filter(|t| !t.is_empty()),
    })
}

fn convert_column(info: WireColumnInfo) -> Result<ColumnDescriptor> {
    let name = info.name.unwrap_or_default();
    let t = info.column_type;

    let kind = if let Some(scalar) = t.scalar_type {
        ColumnKind::Scalar(scalar)
    } else if let Some(element) = t.array_column_info {
        ColumnKind::Array(Box::new(convert_column(*element)?))
    } else if let Some(fields) = t.row_column_info {
        ColumnKind::Row(fields.into_iter().map(convert_column).collect::<Result<_>>()?)
    } else if let Some(value) = t.time_series_measure_value_column_info {
        ColumnKind::TimeSeries(Box::new(convert_column(*value)?))
    } else {
        bail!("column '{}' has no type information", name);
    };

    Ok(ColumnDescriptor { name, kind })
}

fn convert_data(data: Vec<WireDatum>) -> Result<Vec<Datum>> {
    data.into_iter().map(convert_datum).collect()
}

fn convert_datum(datum: WireDatum) -> Result<Datum> {
    if datum.null_value == Some(true) {
        return Ok(Datum::Null);
    }
    if let Some(value) = datum.scalar_value {
        return Ok(Datum::Scalar(value));
    }
    if let Some(items) = datum.array_value {
        return Ok(Datum::Array(convert_data(items)?));
    }
    if let Some(row) = datum.row_value {
        return Ok(Datum::Row(convert_data(row.data)?));
    }
    if let Some(points) = datum.time_series_value {
        let points = points
            .into_iter()
            .map(|p| {
                Ok(TimePoint {
                    time: p.time,
                    value: convert_datum(p.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Datum::TimeSeries(points));
    }
    bail!("datum carries no value")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "QueryId": "AEDQCAMYQ2",
        "NextToken": "AEBQEANMHG",
        "ColumnInfo": [
            {"Name": "measure_name", "Type": {"ScalarType": "VARCHAR"}},
            {"Name": "time", "Type": {"ScalarType": "TIMESTAMP"}},
            {"Name": "tags", "Type": {"ArrayColumnInfo": {"Type": {"ScalarType": "VARCHAR"}}}},
            {"Name": "loc", "Type": {"RowColumnInfo": [
                {"Name": "lat", "Type": {"ScalarType": "DOUBLE"}},
                {"Name": "lon", "Type": {"ScalarType": "DOUBLE"}}
            ]}},
            {"Name": "series", "Type": {"TimeSeriesMeasureValueColumnInfo": {"Type": {"ScalarType": "DOUBLE"}}}}
        ],
        "Rows": [
            {"Data": [
                {"ScalarValue": "cpu"},
                {"ScalarValue": "2021-06-10 12:00:00.000000000"},
                {"ArrayValue": [{"ScalarValue": "a"}, {"NullValue": true}]},
                {"RowValue": {"Data": [{"ScalarValue": "1.5"}, {"ScalarValue": "2.5"}]}},
                {"TimeSeriesValue": [{"Time": "2021-06-10 12:00:00.000000000", "Value": {"ScalarValue": "0.3"}}]}
            ]}
        ],
        "QueryStatus": {"ProgressPercentage": 100.0}
    }"#;

    #[test]
    fn converts_nested_columns_and_rows() {
        let page = parse_query_response(RESPONSE).unwrap();

        assert_eq!(page.next_token.as_deref(), Some("AEBQEANMHG"));
        assert_eq!(page.columns.len(), 5);
        assert_eq!(page.columns[0], ColumnDescriptor::scalar("measure_name", "VARCHAR"));
        assert_eq!(
            page.columns[2],
            ColumnDescriptor::array("tags", ColumnDescriptor::scalar("", "VARCHAR"))
        );
        assert_eq!(
            page.columns[3],
            ColumnDescriptor::row(
                "loc",
                vec![
                    ColumnDescriptor::scalar("lat", "DOUBLE"),
                    ColumnDescriptor::scalar("lon", "DOUBLE"),
                ]
            )
        );

        let row = &page.rows[0];
        assert_eq!(row.data[0], Datum::scalar("cpu"));
        assert_eq!(
            row.data[2],
            Datum::Array(vec![Datum::scalar("a"), Datum::Null])
        );
        assert_eq!(
            row.data[4],
            Datum::TimeSeries(vec![TimePoint {
                time: "2021-06-10 12:00:00.000000000".into(),
                value: Datum::scalar("0.3"),
            }])
        );
    }

    #[test]
    fn last_page_has_no_token() {
        let page = parse_query_response(r#"{"Rows": [], "ColumnInfo": []}"#).unwrap();
        assert!(page.next_token.is_none());
        assert!(page.rows.is_empty());

        let page = parse_query_response(r#"{"Rows": [], "ColumnInfo": [], "NextToken": ""}"#).unwrap();
        assert!(page.next_token.is_none());
    }

    #[test]
    fn empty_datum_is_rejected() {
        let body = r#"{"ColumnInfo": [{"Name": "x", "Type": {"ScalarType": "VARCHAR"}}], "Rows": [{"Data": [{}]}]}"#;
        assert!(parse_query_response(body).is_err());
    }

    #[test]
    fn request_uses_pascal_case_and_omits_missing_token() {
        let json = serde_json::to_string(&WireQueryRequest {
            query_string: "SELECT 1",
            max_rows: 1000,
            next_token: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"QueryString":"SELECT 1","MaxRows":1000}"#);
    }

    #[test]
    fn describe_endpoints_response() {
        let resp: DescribeEndpointsResponse = serde_json::from_str(
            r#"{"Endpoints":[{"Address":"query-cell2.timestream.eu-west-1.amazonaws.com","CachePeriodInMinutes":1440}]}"#,
        )
        .unwrap();
        assert_eq!(
            resp.endpoints[0].address,
            "query-cell2.timestream.eu-west-1.amazonaws.com"
        );
    }
}
