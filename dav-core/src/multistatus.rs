use std::collections::HashMap;
use std::time::SystemTime;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use reqwest::StatusCode;

use crate::client::DavError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    pub fn as_header_value(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

/// Live properties from the `DAV:` namespace understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prop {
    ResourceType,
    GetContentLength,
    GetContentType,
    GetLastModified,
    QuotaAvailableBytes,
    /// Writable modification time accepted by ownCloud-style servers via PROPPATCH.
    LastModified,
}

impl Prop {
    pub fn local_name(self) -> &'static str {
        match self {
            Prop::ResourceType => "resourcetype",
            Prop::GetContentLength => "getcontentlength",
            Prop::GetContentType => "getcontenttype",
            Prop::GetLastModified => "getlastmodified",
            Prop::QuotaAvailableBytes => "quota-available-bytes",
            Prop::LastModified => "lastmodified",
        }
    }
}

/// Properties reported with a success status for one resource.
///
/// Values are keyed by element local name; namespaces are not tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropMap {
    values: HashMap<String, String>,
    collection: bool,
}

impl PropMap {
    pub fn get(&self, prop: Prop) -> Option<&str> {
        self.values.get(prop.local_name()).map(String::as_str)
    }

    pub fn contains(&self, prop: Prop) -> bool {
        self.values.contains_key(prop.local_name())
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(Prop::GetContentLength)?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(Prop::GetContentType).filter(|value| !value.is_empty())
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get(Prop::GetLastModified)?.trim()).ok()
    }

    /// Negative values (RFC 4331 servers use them for "unknown") are reported as `None`.
    pub fn quota_available_bytes(&self) -> Option<u64> {
        self.get(Prop::QuotaAvailableBytes)?.trim().parse().ok()
    }

    fn merge(&mut self, other: PropMap) {
        self.values.extend(other.values);
        self.collection |= other.collection;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResponse {
    pub href: String,
    /// Response-level status, present when the server reports one instead of propstats.
    pub status: Option<StatusCode>,
    pub props: PropMap,
    /// First non-success propstat status, if any.
    pub rejected_status: Option<StatusCode>,
}

pub(crate) fn propfind_body(props: &[Prop]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:propfind xmlns:d="DAV:">"#);
    if props.is_empty() {
        body.push_str("<d:allprop/>");
    } else {
        body.push_str("<d:prop>");
        for prop in props {
            body.push_str(&format!("<d:{}/>", prop.local_name()));
        }
        body.push_str("</d:prop>");
    }
    body.push_str("</d:propfind>");
    body
}

pub(crate) fn proppatch_body(props: &[(Prop, String)]) -> String {
    let mut body =
        String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:propertyupdate xmlns:d="DAV:">"#);
    body.push_str("<d:set><d:prop>");
    for (prop, value) in props {
        let name = prop.local_name();
        body.push_str(&format!("<d:{name}>{}</d:{name}>", escape(value.as_str())));
    }
    body.push_str("</d:prop></d:set></d:propertyupdate>");
    body
}

/// Parses a `207 Multi-Status` body into per-resource entries, in document order.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>, DavError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut parser = Parser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                parser.open(&name);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                parser.open(&name);
                parser.close(&name);
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                parser.close(&name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| DavError::Xml(err.to_string()))?;
                parser.text.push_str(&text);
            }
            Ok(Event::CData(e)) => parser.text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(err) => return Err(DavError::Xml(err.to_string())),
            _ => {}
        }
    }

    if !parser.saw_multistatus {
        return Err(DavError::Xml("missing multistatus root element".into()));
    }
    Ok(parser.responses)
}

#[derive(Debug, Default)]
struct Propstat {
    props: PropMap,
    status: Option<StatusCode>,
}

#[derive(Debug, Default)]
struct Parser {
    saw_multistatus: bool,
    responses: Vec<DavResponse>,
    response: Option<DavResponse>,
    propstat: Option<Propstat>,
    in_prop: bool,
    property: Option<String>,
    nested: usize,
    text: String,
}

impl Parser {
    fn open(&mut self, name: &str) {
        if let Some(property) = self.property.as_deref() {
            self.nested += 1;
            if property == "resourcetype" && name == "collection" {
                if let Some(propstat) = self.propstat.as_mut() {
                    propstat.props.collection = true;
                }
            }
            return;
        }
        if self.in_prop {
            self.property = Some(name.to_string());
            self.nested = 0;
            self.text.clear();
            return;
        }
        match name {
            "multistatus" => self.saw_multistatus = true,
            "response" => self.response = Some(DavResponse::default()),
            "propstat" if self.response.is_some() => self.propstat = Some(Propstat::default()),
            "prop" if self.propstat.is_some() => self.in_prop = true,
            "href" | "status" => self.text.clear(),
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        if self.property.is_some() {
            if self.nested > 0 {
                self.nested -= 1;
                return;
            }
            let property = self.property.take().unwrap_or_default();
            let value = self.text.trim().to_string();
            self.text.clear();
            if let Some(propstat) = self.propstat.as_mut() {
                propstat.props.values.insert(property, value);
            }
            return;
        }
        if self.in_prop {
            if name == "prop" {
                self.in_prop = false;
            }
            return;
        }
        match name {
            "href" => {
                if let Some(response) = self.response.as_mut() {
                    if response.href.is_empty() {
                        response.href = self.text.trim().to_string();
                    }
                }
            }
            "status" => {
                let status = parse_status_line(&self.text);
                if let Some(propstat) = self.propstat.as_mut() {
                    propstat.status = status;
                } else if let Some(response) = self.response.as_mut() {
                    response.status = status;
                }
            }
            "propstat" => {
                if let (Some(propstat), Some(response)) =
                    (self.propstat.take(), self.response.as_mut())
                {
                    match propstat.status {
                        Some(status) if !status.is_success() => {
                            response.rejected_status.get_or_insert(status);
                        }
                        _ => response.props.merge(propstat.props),
                    }
                }
            }
            "response" => {
                if let Some(response) = self.response.take() {
                    self.responses.push(response);
                }
            }
            _ => {}
        }
    }
}

fn parse_status_line(line: &str) -> Option<StatusCode> {
    let code = line.split_whitespace().nth(1)?.parse::<u16>().ok()?;
    StatusCode::from_u16(code).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/webdav/Docs/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Tue, 02 Jan 2024 10:00:00 GMT</d:getlastmodified>
        <d:quota-available-bytes>4096</d:quota-available-bytes>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/Docs/Hello%20World.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>12</d:getcontentlength>
        <d:getcontenttype>text/plain</d:getcontenttype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop>
        <d:quota-available-bytes/>
      </d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_entries_in_document_order() {
        let responses = parse_multistatus(LISTING).unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].href, "/remote.php/webdav/Docs/");
        assert!(responses[0].props.is_collection());
        assert_eq!(responses[0].props.quota_available_bytes(), Some(4096));
        assert_eq!(responses[1].href, "/remote.php/webdav/Docs/Hello%20World.txt");
        assert!(!responses[1].props.is_collection());
        assert_eq!(responses[1].props.content_length(), Some(12));
        assert_eq!(responses[1].props.content_type(), Some("text/plain"));
    }

    #[test]
    fn drops_properties_from_failed_propstats() {
        let responses = parse_multistatus(LISTING).unwrap();
        let file = &responses[1];

        assert!(!file.props.contains(Prop::QuotaAvailableBytes));
        assert_eq!(file.rejected_status, Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn parses_http_dates() {
        let responses = parse_multistatus(LISTING).unwrap();
        let modified = responses[0].props.last_modified().unwrap();
        let expected = httpdate::parse_http_date("Tue, 02 Jan 2024 10:00:00 GMT").unwrap();
        assert_eq!(modified, expected);
    }

    #[test]
    fn accepts_unprefixed_default_namespace() {
        let xml = r#"<multistatus xmlns="DAV:"><response><href>/a</href>
            <propstat><prop><resourcetype><collection/></resourcetype></prop>
            <status>HTTP/1.1 200 OK</status></propstat></response></multistatus>"#;
        let responses = parse_multistatus(xml).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].props.is_collection());
    }

    #[test]
    fn records_response_level_status() {
        let xml = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:href>/gone</d:href>
            <d:status>HTTP/1.1 404 Not Found</d:status></d:response></d:multistatus>"#;
        let responses = parse_multistatus(xml).unwrap();
        assert_eq!(responses[0].status, Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn negative_quota_is_unknown() {
        let xml = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:href>/</d:href>
            <d:propstat><d:prop><d:quota-available-bytes>-3</d:quota-available-bytes></d:prop>
            <d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response></d:multistatus>"#;
        let responses = parse_multistatus(xml).unwrap();
        assert!(responses[0].props.contains(Prop::QuotaAvailableBytes));
        assert_eq!(responses[0].props.quota_available_bytes(), None);
    }

    #[test]
    fn rejects_documents_without_multistatus() {
        assert!(matches!(
            parse_multistatus("<html><body>login</body></html>"),
            Err(DavError::Xml(_))
        ));
    }

    #[test]
    fn builds_propfind_and_proppatch_bodies() {
        let body = propfind_body(&[Prop::ResourceType, Prop::GetContentLength]);
        assert!(body.contains("<d:prop><d:resourcetype/><d:getcontentlength/></d:prop>"));
        assert!(propfind_body(&[]).contains("<d:allprop/>"));

        let patch = proppatch_body(&[(Prop::LastModified, "1700000000".into())]);
        assert!(patch.contains("<d:lastmodified>1700000000</d:lastmodified>"));
    }
}
