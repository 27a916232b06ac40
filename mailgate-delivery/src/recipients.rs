//! Validation and per-domain grouping of envelope recipients.

/// Reason recorded for a recipient that is not a usable address.
pub const INVALID_RECIPIENT: &str = "invalid recipient address";

/// Recipients that share a destination domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainGroup {
    /// Lowercased.
    pub domain: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedRecipients {
    /// In order of each domain's first appearance.
    pub groups: Vec<DomainGroup>,
    /// Addresses that cannot be delivered to at all.
    pub invalid: Vec<String>,
}

/// Splits `recipients` by domain, setting aside anything that is not of the
/// form `local@domain`.
#[must_use]
pub fn group_recipients(recipients: &[String]) -> GroupedRecipients {
    let mut grouped = GroupedRecipients::default();

    for recipient in recipients {
        let Some(domain) = domain_of(recipient) else {
            grouped.invalid.push(recipient.clone());
            continue;
        };

        let domain = domain.to_ascii_lowercase();
        match grouped.groups.iter_mut().find(|group| group.domain == domain) {
            Some(group) => group.recipients.push(recipient.clone()),
            None => grouped.groups.push(DomainGroup {
                domain,
                recipients: vec![recipient.clone()],
            }),
        }
    }

    grouped
}

fn domain_of(address: &str) -> Option<&str> {
    if address.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
        return None;
    }

    let (local, domain) = address.split_once('@')?;
    (!local.is_empty() && !domain.is_empty() && !domain.contains('@')).then_some(domain)
}
