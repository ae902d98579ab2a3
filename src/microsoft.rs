//! Microsoft Advertising Customer Management Client
//!
//! SOAP transport for the Customer Management v13 service. Client links are
//! searched page by page ([`PageSource`]) and created with `AddClientLinks`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{AdsError, Result};
use crate::gateway::{
    MutationGateway, Operation, PageRequest, PageSource, PaginatedQueryGateway, QueryGateway,
    ResourceKind, Row,
};
use crate::query::parse_filters;
use crate::session::Session;

pub const CUSTOMER_MANAGEMENT_URL: &str =
    "https://clientcenter.api.bingads.microsoft.com/Api/CustomerManagement/v13/CustomerManagementService.svc";

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const CUSTOMER_NS: &str = "https://bingads.microsoft.com/Customer/v13";
const ENTITIES_NS: &str = "https://bingads.microsoft.com/Customer/v13/Entities";

const PLATFORM: &str = "microsoft-ads";

/// `ClientLink` members in schema order; the service rejects out-of-order
/// elements.
const CLIENT_LINK_FIELDS: &[&str] = &[
    "Type",
    "ClientEntityId",
    "ClientEntityNumber",
    "ClientEntityName",
    "ManagingCustomerId",
    "ManagingCustomerNumber",
    "ManagingCustomerName",
    "Note",
    "Name",
    "InviterEmail",
    "InviterName",
    "InviterPhone",
    "IsBillToClient",
    "StartDate",
    "Status",
    "SuppressNotification",
];

/// Customer Management SOAP client
#[derive(Clone)]
pub struct MicrosoftAdsClient {
    http: Client,
    endpoint: String,
    session: Arc<dyn Session>,
    developer_token: String,
}

/// What we pull out of a SOAP response body
#[derive(Debug, Default, PartialEq)]
struct SoapReply {
    /// Local name of the first element inside `Envelope/Body`
    response: Option<String>,
    fault: Option<String>,
    client_links: Vec<Map<String, Value>>,
    operation_errors: Vec<String>,
}

impl MicrosoftAdsClient {
    pub fn new(session: Arc<dyn Session>, developer_token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("ads-access-agent/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdsError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: CUSTOMER_MANAGEMENT_URL.to_string(),
            session,
            developer_token: developer_token.into(),
        })
    }

    /// Point the client at another service URL (used by tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Split into the query/mutation capability pair services consume.
    pub fn into_gateways(self) -> (Arc<dyn QueryGateway>, Arc<dyn MutationGateway>) {
        let mutation: Arc<dyn MutationGateway> = Arc::new(self.clone());
        (Arc::new(PaginatedQueryGateway::new(self)), mutation)
    }

    fn envelope(&self, token: &str, body: &str) -> String {
        format!(
            concat!(
                r#"<s:Envelope xmlns:s="{}" xmlns:i="{}">"#,
                r#"<s:Header xmlns="{}">"#,
                "<AuthenticationToken>{}</AuthenticationToken>",
                "<DeveloperToken>{}</DeveloperToken>",
                "</s:Header>",
                "<s:Body>{}</s:Body>",
                "</s:Envelope>"
            ),
            SOAP_ENV_NS,
            XSI_NS,
            CUSTOMER_NS,
            escape(token),
            escape(self.developer_token.as_str()),
            body
        )
    }

    /// Send one SOAP action and parse the reply.
    ///
    /// Faults are rewrapped as transport errors carrying the fault text.
    async fn call(&self, action: &str, body: &str) -> Result<SoapReply> {
        let token = self.session.access_token().await?;
        let envelope = self.envelope(&token, body);

        debug!(action = %action, "Calling Customer Management service");

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        let reply = match parse_reply(&text) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(AdsError::Transport(format!("{} returned {}", action, status)));
            }
            Err(e) => return Err(e),
        };

        if let Some(fault) = reply.fault {
            return Err(AdsError::Transport(format!("SOAP Fault: {}", fault)));
        }
        if !status.is_success() {
            return Err(AdsError::Transport(format!("{} returned {}", action, status)));
        }
        if reply.response.as_deref() != Some(format!("{}Response", action).as_str()) {
            return Err(AdsError::Transport(format!("{} returned no SOAP response", action)));
        }

        Ok(reply)
    }
}

fn search_client_links_body(filters: &[(String, String)], page: PageRequest) -> String {
    let predicates: String = filters
        .iter()
        .map(|(field, value)| {
            format!(
                "<a:Predicate><a:Field>{}</a:Field><a:Operator>Equals</a:Operator><a:Value>{}</a:Value></a:Predicate>",
                escape(field.as_str()),
                escape(value.as_str())
            )
        })
        .collect();

    format!(
        concat!(
            r#"<SearchClientLinksRequest xmlns="{ns}">"#,
            r#"<Predicates xmlns:a="{ent}">{predicates}</Predicates>"#,
            r#"<Ordering i:nil="true" xmlns:a="{ent}"/>"#,
            r#"<PageInfo xmlns:a="{ent}"><a:Index>{index}</a:Index><a:Size>{size}</a:Size></PageInfo>"#,
            "</SearchClientLinksRequest>"
        ),
        ns = CUSTOMER_NS,
        ent = ENTITIES_NS,
        predicates = predicates,
        index = page.index,
        size = page.size
    )
}

fn add_client_links_body(links: &[Value]) -> Result<String> {
    let mut body = String::new();
    for link in links {
        let fields = link.as_object().ok_or_else(|| {
            AdsError::InvalidArgument("client link payload must be an object".to_string())
        })?;

        body.push_str("<a:ClientLink>");
        for name in CLIENT_LINK_FIELDS {
            let Some(value) = fields.get(*name) else {
                continue;
            };
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            body.push_str(&format!("<a:{name}>{}</a:{name}>", escape(text.as_str())));
        }
        body.push_str("</a:ClientLink>");
    }

    Ok(format!(
        r#"<AddClientLinksRequest xmlns="{}"><ClientLinks xmlns:a="{}">{}</ClientLinks></AddClientLinksRequest>"#,
        CUSTOMER_NS, ENTITIES_NS, body
    ))
}

/// Walk the response, collecting client links, operation errors and faults.
fn parse_reply(xml: &str) -> Result<SoapReply> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut reply = SoapReply::default();
    let mut path: Vec<String> = Vec::new();
    let mut link: Option<Map<String, Value>> = None;
    let mut fault_parts: Vec<String> = Vec::new();
    let mut in_fault = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                note_body_child(&mut reply, &path, &name);
                match name.as_str() {
                    "ClientLink" => link = Some(Map::new()),
                    "Fault" => in_fault = true,
                    _ => {}
                }
                path.push(name);
            }
            Event::End(_) => {
                if let Some(name) = path.pop() {
                    if name == "ClientLink" {
                        if let Some(done) = link.take() {
                            reply.client_links.push(done);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                note_body_child(&mut reply, &path, &name);
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                let Some(current) = path.last().map(String::as_str) else {
                    continue;
                };
                let parent = path.len().checked_sub(2).map(|i| path[i].as_str());

                if in_fault {
                    if matches!(current, "faultstring" | "Message") {
                        fault_parts.push(text);
                    }
                } else if parent == Some("OperationError") && current == "Message" {
                    reply.operation_errors.push(text);
                } else if parent == Some("ClientLink") {
                    if let Some(fields) = link.as_mut() {
                        fields.insert(current.to_string(), Value::String(text));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if in_fault {
        reply.fault = Some(if fault_parts.is_empty() {
            "unknown fault".to_string()
        } else {
            fault_parts.join(": ")
        });
    }

    Ok(reply)
}

/// Remember the first element opened directly under `Envelope/Body`.
fn note_body_child(reply: &mut SoapReply, path: &[String], name: &str) {
    if reply.response.is_none()
        && matches!(path, [envelope, body] if envelope == "Envelope" && body == "Body")
    {
        reply.response = Some(name.to_string());
    }
}

#[async_trait]
impl PageSource for MicrosoftAdsClient {
    async fn fetch_page(
        &self,
        account_id: &str,
        query: &str,
        page: PageRequest,
    ) -> Result<Vec<Row>> {
        let filters = parse_filters(query).ok_or_else(|| {
            AdsError::InvalidArgument(format!("unsupported client link query: {}", query))
        })?;

        debug!(account_id = %account_id, page = page.index, "SearchClientLinks");

        let reply = self
            .call("SearchClientLinks", &search_client_links_body(&filters, page))
            .await?;

        if !reply.operation_errors.is_empty() {
            return Err(AdsError::api_operation(reply.operation_errors));
        }

        Ok(reply
            .client_links
            .into_iter()
            .map(|link| Row::new(json!({ "ClientLink": link })))
            .collect())
    }
}

#[async_trait]
impl MutationGateway for MicrosoftAdsClient {
    async fn apply(
        &self,
        account_id: &str,
        kind: ResourceKind,
        operations: Vec<Operation>,
    ) -> Result<()> {
        if kind != ResourceKind::ClientLink {
            return Err(AdsError::unsupported(PLATFORM, format!("mutate {}", kind)));
        }

        let mut links = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation {
                Operation::Create(payload) => links.push(payload),
                Operation::Remove(_) => {
                    return Err(AdsError::unsupported(PLATFORM, "remove client_link"));
                }
            }
        }

        if links.is_empty() {
            debug!(account_id = %account_id, "Skipping empty AddClientLinks batch");
            return Ok(());
        }

        let reply = self
            .call("AddClientLinks", &add_client_links_body(&links)?)
            .await?;

        if !reply.operation_errors.is_empty() {
            return Err(AdsError::api_operation(reply.operation_errors));
        }

        debug!(account_id = %account_id, links = links.len(), "AddClientLinks applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_REPLY: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Header><h:TrackingId xmlns:h="https://bingads.microsoft.com/Customer/v13">abc</h:TrackingId></s:Header>
  <s:Body>
    <SearchClientLinksResponse xmlns="https://bingads.microsoft.com/Customer/v13">
      <ClientLinks xmlns:a="https://bingads.microsoft.com/Customer/v13/Entities" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">
        <a:ClientLink>
          <a:Type>AccountLink</a:Type>
          <a:ClientEntityId>111</a:ClientEntityId>
          <a:ClientEntityNumber>F111</a:ClientEntityNumber>
          <a:Note i:nil="true"/>
          <a:Status>Active</a:Status>
        </a:ClientLink>
        <a:ClientLink>
          <a:Type>AccountLink</a:Type>
          <a:ClientEntityId>222</a:ClientEntityId>
          <a:ClientEntityNumber>F222</a:ClientEntityNumber>
          <a:Status>LinkPending</a:Status>
        </a:ClientLink>
      </ClientLinks>
    </SearchClientLinksResponse>
  </s:Body>
</s:Envelope>"#;

    const FAULT_REPLY: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Server</faultcode>
      <faultstring xml:lang="en-US">Invalid client data. Check the SOAP fault details for more information.</faultstring>
      <detail>
        <AdApiFaultDetail xmlns="https://adapi.microsoft.com">
          <Errors><AdApiError><Code>105</Code><Message>Authentication failed.</Message></AdApiError></Errors>
        </AdApiFaultDetail>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

    const OPERATION_ERROR_REPLY: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <AddClientLinksResponse xmlns="https://bingads.microsoft.com/Customer/v13">
      <OperationErrors xmlns:a="https://bingads.microsoft.com/Customer/v13/Entities">
        <a:OperationError><a:Code>1001</a:Code><a:Message>Client link already exists.</a:Message></a:OperationError>
      </OperationErrors>
      <PartialErrors xmlns:a="https://bingads.microsoft.com/Customer/v13/Entities"/>
    </AddClientLinksResponse>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn test_parse_client_links() {
        let reply = parse_reply(SEARCH_REPLY).unwrap();

        assert!(reply.fault.is_none());
        assert_eq!(reply.client_links.len(), 2);
        assert_eq!(reply.client_links[0]["ClientEntityId"], json!("111"));
        assert_eq!(reply.client_links[0]["Status"], json!("Active"));
        assert!(!reply.client_links[0].contains_key("Note"));
        assert_eq!(reply.client_links[1]["Status"], json!("LinkPending"));
        assert_eq!(reply.response.as_deref(), Some("SearchClientLinksResponse"));
    }

    #[test]
    fn test_parse_fault() {
        let reply = parse_reply(FAULT_REPLY).unwrap();
        let fault = reply.fault.unwrap();
        assert!(fault.starts_with("Invalid client data."));
        assert!(fault.ends_with("Authentication failed."));
    }

    #[test]
    fn test_parse_operation_errors() {
        let reply = parse_reply(OPERATION_ERROR_REPLY).unwrap();
        assert_eq!(reply.operation_errors, vec!["Client link already exists.".to_string()]);
        assert!(reply.client_links.is_empty());
    }

    #[test]
    fn test_parse_self_closing_response() {
        let reply = parse_reply(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><AddClientLinksResponse xmlns="https://bingads.microsoft.com/Customer/v13"/></s:Body></s:Envelope>"#,
        )
        .unwrap();
        assert_eq!(reply.response.as_deref(), Some("AddClientLinksResponse"));
    }

    #[test]
    fn test_parse_non_soap_reply_has_no_response() {
        let html = parse_reply("<html><body>Service Unavailable</body></html>").unwrap();
        assert_eq!(html.response, None);
        assert!(html.fault.is_none());

        assert_eq!(parse_reply("").unwrap(), SoapReply::default());
    }

    #[test]
    fn test_search_body_carries_predicates_and_paging() {
        let body = search_client_links_body(
            &[("ManagingCustomerId".to_string(), "12<3".to_string())],
            PageRequest { index: 2, size: 100 },
        );

        assert!(body.contains("<a:Field>ManagingCustomerId</a:Field>"));
        assert!(body.contains("<a:Value>12&lt;3</a:Value>"));
        assert!(body.contains("<a:Index>2</a:Index><a:Size>100</a:Size>"));
    }

    #[test]
    fn test_add_client_links_body_uses_schema_order() {
        let body = add_client_links_body(&[json!({
            "SuppressNotification": false,
            "IsBillToClient": true,
            "ManagingCustomerId": "999",
            "ClientEntityNumber": "F123",
            "Type": "AccountLink"
        })])
        .unwrap();

        let pos = |tag: &str| body.find(tag).unwrap();
        assert!(pos("<a:Type>AccountLink</a:Type>") < pos("<a:ClientEntityNumber>F123"));
        assert!(pos("<a:ClientEntityNumber>") < pos("<a:ManagingCustomerId>999"));
        assert!(pos("<a:ManagingCustomerId>") < pos("<a:IsBillToClient>true"));
        assert!(pos("<a:IsBillToClient>") < pos("<a:SuppressNotification>false"));
    }

    #[test]
    fn test_add_client_links_rejects_non_object_payload() {
        let err = add_client_links_body(&[json!("F123")]).unwrap_err();
        assert!(matches!(err, AdsError::InvalidArgument(_)));
    }
}
