//! SOAP faults returned to enrolling devices.

use crate::soap::start_envelope;
use crate::xml::{XmlError, XmlWriter};

const FAULT_ACTION: &str = "http://www.w3.org/2005/08/addressing/soap/fault";

/// Which party is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    Sender,
    Receiver,
}

/// Enrollment error subcodes understood by the Windows enrollment client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSubcode {
    MessageFormat,
    Authentication,
    Authorization,
    CertificateRequest,
    EnrollmentServer,
    InternalServiceFault,
}

impl FaultSubcode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::MessageFormat => "s:MessageFormat",
            Self::Authentication => "s:Authentication",
            Self::Authorization => "s:Authorization",
            Self::CertificateRequest => "s:CertificateRequest",
            Self::EnrollmentServer => "s:EnrollmentServer",
            Self::InternalServiceFault => "s:InternalServiceFault",
        }
    }
}

/// A SOAP 1.2 fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub subcode: FaultSubcode,
    /// Human readable reason shown by the enrollment UI.
    pub reason: String,
    /// `RelatesTo` value, when the request got far enough to have one.
    pub relates_to: Option<String>,
}

impl Fault {
    pub fn sender(subcode: FaultSubcode, reason: impl Into<String>) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode,
            reason: reason.into(),
            relates_to: None,
        }
    }

    pub fn receiver(subcode: FaultSubcode, reason: impl Into<String>) -> Self {
        Self {
            code: FaultCode::Receiver,
            subcode,
            reason: reason.into(),
            relates_to: None,
        }
    }

    pub fn relates_to(mut self, message_id: impl Into<String>) -> Self {
        self.relates_to = Some(message_id.into());
        self
    }

    /// HTTP status the fault is sent with.
    pub fn http_status(&self) -> u16 {
        match (self.code, self.subcode) {
            (_, FaultSubcode::Authentication) => 401,
            (_, FaultSubcode::Authorization) => 403,
            (FaultCode::Sender, _) => 400,
            (FaultCode::Receiver, _) => 500,
        }
    }

    pub fn to_xml(&self) -> Result<String, XmlError> {
        let mut w = XmlWriter::new();
        start_envelope(&mut w, &[])?;

        w.start("s:Header", &[])?;
        w.element("a:Action", &[("s:mustUnderstand", "1")], FAULT_ACTION)?;
        if let Some(id) = &self.relates_to {
            w.element("a:RelatesTo", &[], id)?;
        }
        w.end("s:Header")?;

        w.start("s:Body", &[])?;
        w.start("s:Fault", &[])?;
        w.start("s:Code", &[])?;
        let code = match self.code {
            FaultCode::Sender => "s:Sender",
            FaultCode::Receiver => "s:Receiver",
        };
        w.element("s:Value", &[], code)?;
        w.start("s:Subcode", &[])?;
        w.element("s:Value", &[], self.subcode.as_str())?;
        w.end("s:Subcode")?;
        w.end("s:Code")?;
        w.start("s:Reason", &[])?;
        w.element("s:Text", &[("xml:lang", "en-US")], &self.reason)?;
        w.end("s:Reason")?;
        w.end("s:Fault")?;
        w.end("s:Body")?;

        w.end("s:Envelope")?;
        w.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlNode;

    #[test]
    fn test_fault_document() {
        let fault = Fault::sender(FaultSubcode::MessageFormat, "bad request").relates_to("urn:uuid:9");
        let xml = fault.to_xml().unwrap();
        let root = XmlNode::parse(&xml).unwrap();

        assert_eq!(root.text_at("Header/RelatesTo").as_deref(), Some("urn:uuid:9"));
        assert_eq!(root.text_at("Body/Fault/Code/Value").as_deref(), Some("s:Sender"));
        assert_eq!(
            root.text_at("Body/Fault/Code/Subcode/Value").as_deref(),
            Some("s:MessageFormat")
        );
        assert_eq!(root.text_at("Body/Fault/Reason/Text").as_deref(), Some("bad request"));
        assert_eq!(fault.http_status(), 400);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Fault::sender(FaultSubcode::Authentication, "x").http_status(), 401);
        assert_eq!(Fault::receiver(FaultSubcode::EnrollmentServer, "x").http_status(), 500);
    }
}
