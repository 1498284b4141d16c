//! Just enough SOAP for the handful of `vim25` calls the gate makes.

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;
use toolsgate_core::{BackendError, ObjectRef};

pub const VIM_NAMESPACE: &str = "urn:vim25";

/// Wraps a request body element in a SOAP 1.1 envelope.
pub fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
            "<soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"
        ),
        body
    )
}

pub fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

/// Builder for a single request element, e.g. `<Login xmlns="urn:vim25">`.
pub struct Request {
    buf: String,
    method: &'static str,
}

impl Request {
    pub fn new(method: &'static str, this: &ObjectRef) -> Self {
        let mut req = Self {
            buf: format!(r#"<{method} xmlns="{VIM_NAMESPACE}">"#),
            method,
        };
        req.push_ref("_this", this);
        req
    }

    pub fn push_ref(&mut self, tag: &str, r: &ObjectRef) -> &mut Self {
        let _ = write!(
            self.buf,
            r#"<{tag} type="{}">{}</{tag}>"#,
            escape(&r.kind),
            escape(&r.value)
        );
        self
    }

    pub fn push_text(&mut self, tag: &str, text: &str) -> &mut Self {
        let _ = write!(self.buf, "<{tag}>{}</{tag}>", escape(text));
        self
    }

    /// Appends pre-built markup.
    pub fn push_raw(&mut self, xml: &str) -> &mut Self {
        self.buf.push_str(xml);
        self
    }

    pub fn finish(mut self) -> String {
        let _ = write!(self.buf, "</{}>", self.method);
        envelope(&self.buf)
    }
}

/// Minimal element tree. Names are local (prefix stripped); attribute keys
/// are kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn open(e: &BytesStart<'_>) -> Result<Self, BackendError> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let attrs = e
            .attributes()
            .map(|a| {
                let a = a.map_err(malformed)?;
                let value = a.unescape_value().map_err(malformed)?.into_owned();
                Ok((String::from_utf8_lossy(a.key.as_ref()).into_owned(), value))
            })
            .collect::<Result<_, BackendError>>()?;
        Ok(Self {
            name,
            attrs,
            ..Default::default()
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Walks a path of child names, taking the first match at each step.
    pub fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Reads this element as a managed object reference.
    pub fn as_ref_value(&self) -> Result<ObjectRef, BackendError> {
        let kind = self
            .attr("type")
            .ok_or_else(|| BackendError::Protocol(format!("<{}> is not an object reference", self.name)))?;
        Ok(ObjectRef::new(kind, self.text.clone()))
    }
}

pub fn parse(xml: &str) -> Result<XmlNode, BackendError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => stack.push(XmlNode::open(&e)?),
            Event::Empty(e) => attach(&mut stack, &mut root, XmlNode::open(&e)?),
            Event::End(_) => {
                let mut node = stack
                    .pop()
                    .ok_or_else(|| BackendError::Protocol("unbalanced xml".into()))?;
                let trimmed = node.text.trim();
                if trimmed.len() != node.text.len() {
                    node.text = trimmed.to_string();
                }
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::GeneralRef(r) => {
                if let Some(top) = stack.last_mut() {
                    if let Some(c) = r.resolve_char_ref().map_err(malformed)? {
                        top.text.push(c);
                    } else {
                        let name = r.decode().map_err(malformed)?;
                        let value = resolve_predefined_entity(&name).ok_or_else(|| {
                            BackendError::Protocol(format!("unknown entity &{name};"))
                        })?;
                        top.text.push_str(value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(BackendError::Protocol("truncated xml".into()));
    }
    root.ok_or_else(|| BackendError::Protocol("empty response".into()))
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn malformed(e: impl std::fmt::Display) -> BackendError {
    BackendError::Protocol(format!("malformed xml: {e}"))
}

/// Returns the first element inside `<Body>`, turning a `<Fault>` into an error.
pub fn body_payload(envelope: &XmlNode) -> Result<&XmlNode, BackendError> {
    let payload = envelope
        .child("Body")
        .and_then(|b| b.children.first())
        .ok_or_else(|| BackendError::Protocol("response has no SOAP body".into()))?;
    if payload.name == "Fault" {
        return Err(fault(payload));
    }
    Ok(payload)
}

/// Fault code is the detail element's declared type (`xsi:type`), falling back
/// to its name without the `Fault` suffix, then to `faultcode`.
fn fault(node: &XmlNode) -> BackendError {
    let message = node
        .child("faultstring")
        .map(|f| f.text.clone())
        .unwrap_or_default();
    let detail = node.child("detail").and_then(|d| d.children.first());
    let code = match detail {
        Some(d) => d
            .attr("xsi:type")
            .map(str::to_string)
            .unwrap_or_else(|| d.name.trim_end_matches("Fault").to_string()),
        None => node
            .child("faultcode")
            .map(|c| c.text.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
    };
    BackendError::Fault { code, message }
}
