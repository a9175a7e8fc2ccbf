//! Request / response classification
//!
//! The proxy only interprets two kinds of message per direction. Requests are
//! classified from their packet type alone. Responses all share type 0x04, so
//! the server's PRELOGIN reply is recognised by position: it is the first
//! type-0x04 message on the connection.

use super::constants::packet_type;
use super::packets::Message;

/// Client-to-server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Prelogin(Message),
    Login(Message),
    Generic(Message),
}

impl Request {
    pub fn message(&self) -> &Message {
        match self {
            Request::Prelogin(m) | Request::Login(m) | Request::Generic(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Request::Prelogin(m) | Request::Login(m) | Request::Generic(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Prelogin(_) => "PRELOGIN",
            Request::Login(_) => "LOGIN7",
            Request::Generic(_) => "generic",
        }
    }
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Prelogin(Message),
    Generic(Message),
}

impl Response {
    pub fn message(&self) -> &Message {
        match self {
            Response::Prelogin(m) | Response::Generic(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Response::Prelogin(m) | Response::Generic(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Response::Prelogin(_) => "PRELOGIN response",
            Response::Generic(_) => "generic",
        }
    }
}

/// Classify a client message by packet type
pub fn classify_request(message: Message) -> Request {
    match message.packet_type() {
        packet_type::PRELOGIN => Request::Prelogin(message),
        packet_type::LOGIN7 => Request::Login(message),
        _ => Request::Generic(message),
    }
}

/// Stateful response classifier, one per connection
#[derive(Debug, Default)]
pub struct ResponseClassifier {
    first_prelogin_seen: bool,
}

impl ResponseClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, message: Message) -> Response {
        if !self.first_prelogin_seen && message.packet_type() == packet_type::TABULAR_RESULT {
            self.first_prelogin_seen = true;
            return Response::Prelogin(message);
        }
        Response::Generic(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(packet_type: u8) -> Message {
        Message::new(packet_type, &[0xAA]).unwrap()
    }

    #[test]
    fn test_classify_request() {
        assert!(matches!(classify_request(msg(18)), Request::Prelogin(_)));
        assert!(matches!(classify_request(msg(16)), Request::Login(_)));
        assert!(matches!(classify_request(msg(1)), Request::Generic(_)));
        assert!(matches!(classify_request(msg(4)), Request::Generic(_)));
    }

    #[test]
    fn test_only_first_tabular_result_is_prelogin() {
        let mut classifier = ResponseClassifier::new();
        let kinds: Vec<&str> = [4, 4, 7, 4]
            .into_iter()
            .map(|t| classifier.classify(msg(t)).kind())
            .collect();
        assert_eq!(kinds, ["PRELOGIN response", "generic", "generic", "generic"]);
    }

    #[test]
    fn test_non_tabular_does_not_consume_flag() {
        let mut classifier = ResponseClassifier::new();
        assert!(matches!(classifier.classify(msg(7)), Response::Generic(_)));
        assert!(matches!(classifier.classify(msg(4)), Response::Prelogin(_)));
    }

    #[test]
    fn test_classifiers_are_independent() {
        let mut a = ResponseClassifier::new();
        let mut b = ResponseClassifier::new();
        assert!(matches!(a.classify(msg(4)), Response::Prelogin(_)));
        assert!(matches!(b.classify(msg(4)), Response::Prelogin(_)));
    }

    #[test]
    fn test_into_message_preserves_bytes() {
        let original = msg(16);
        let request = classify_request(original.clone());
        assert_eq!(request.message(), &original);
        assert_eq!(request.into_message(), original);
    }
}
