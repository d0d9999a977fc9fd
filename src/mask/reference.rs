//! Enriched-reference construction.
//!
//! A predicate never sees a raw hostmask. It sees a two-line reference:
//! a three-character flags header (account, transport security, event
//! kind), a newline, then the canonical `nick!ident@host real-name` form.
//! Compiled masks assert their flag requirements against the header and
//! their body against the second line.

use crate::users::User;

/// The lifecycle event that produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connect,
    Nick,
}

/// Build the 1 or 2 references for one observation.
///
/// The second reference substitutes the IP for the host when the IP is
/// known and differs, so host-spoofed connections are still matchable by
/// address.
pub fn build_references(nick: &str, user: &User, event: Event) -> Vec<String> {
    let header = [
        if user.account.is_some() { 'a' } else { 'A' },
        if user.secure { 'z' } else { 'Z' },
        if event == Event::Connect { 'n' } else { 'N' },
    ];
    let header: String = header.iter().collect();

    let mut references = vec![format!(
        "{header}\n{nick}!{}@{} {}",
        user.ident, user.host, user.real_name
    )];
    if let Some(ip) = &user.ip
        && ip != &user.host
    {
        references.push(format!(
            "{header}\n{nick}!{}@{ip} {}",
            user.ident, user.real_name
        ));
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new("~u", "host.example", "real name", None)
    }

    #[test]
    fn header_encodes_characteristics() {
        let mut u = user();
        let reference = &build_references("nick", &u, Event::Connect)[0];
        assert_eq!(reference, "AZn\nnick!~u@host.example real name");

        u.account = Some("acct".into());
        u.secure = true;
        let reference = &build_references("nick", &u, Event::Nick)[0];
        assert_eq!(reference, "azN\nnick!~u@host.example real name");
    }

    #[test]
    fn ip_yields_second_reference_only_when_it_differs() {
        let mut u = user();
        u.ip = Some("192.0.2.7".into());
        let refs = build_references("nick", &u, Event::Connect);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1], "AZn\nnick!~u@192.0.2.7 real name");

        u.host = "192.0.2.7".into();
        let refs = build_references("nick", &u, Event::Connect);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn spoofed_connection_has_single_reference() {
        let refs = build_references("nick", &user(), Event::Connect);
        assert_eq!(refs.len(), 1);
    }
}
