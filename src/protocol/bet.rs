/// A single bet submitted by an agency.
///
/// One record group on the wire is five comma-separated fields:
/// `first_name,last_name,document,birthdate,number`. The agency id is not
/// part of the payload; it comes from the connection's identification byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub agency: u8,
    pub first_name: String,
    pub last_name: String,
    pub document: u32,
    pub birthdate: String,
    pub number: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum ParseBetError {
    #[error("batch payload is not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("empty name field")]
    EmptyName,

    #[error("invalid document: {0:?}")]
    BadDocument(String),

    #[error("invalid birthdate: {0:?}")]
    BadBirthdate(String),

    #[error("invalid wagered number: {0:?}")]
    BadNumber(String),
}

impl Bet {
    /// Parses one comma-separated record group.
    pub fn parse(agency: u8, group: &str) -> Result<Self, ParseBetError> {
        let fields: Vec<&str> = group.split(',').map(str::trim).collect();
        let [first_name, last_name, document, birthdate, number] = fields[..] else {
            return Err(ParseBetError::FieldCount(fields.len()));
        };

        if first_name.is_empty() || last_name.is_empty() {
            return Err(ParseBetError::EmptyName);
        }

        let document = document
            .parse()
            .map_err(|_| ParseBetError::BadDocument(document.to_owned()))?;

        if !is_iso_date(birthdate) {
            return Err(ParseBetError::BadBirthdate(birthdate.to_owned()));
        }

        let number = number
            .parse()
            .map_err(|_| ParseBetError::BadNumber(number.to_owned()))?;

        Ok(Self {
            agency,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            document,
            birthdate: birthdate.to_owned(),
            number,
        })
    }
}

/// Decodes a whole batch payload into bets, all-or-nothing.
///
/// Record groups are separated by `;`; a single trailing separator is
/// tolerated because the submitting clients terminate every group with one.
/// Any malformed group fails the entire batch.
pub fn parse_batch(agency: u8, payload: &[u8]) -> Result<Vec<Bet>, ParseBetError> {
    let payload = std::str::from_utf8(payload)?;

    let mut groups: Vec<&str> = payload.trim().split(';').collect();
    if groups.last() == Some(&"") {
        groups.pop();
    }

    groups
        .into_iter()
        .map(|group| Bet::parse(agency, group))
        .collect()
}

// YYYY-MM-DD
fn is_iso_date(text: &str) -> bool {
    let raw = text.as_bytes();
    raw.len() == 10
        && raw[4] == b'-'
        && raw[7] == b'-'
        && raw
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 4 | 7) || b.is_ascii_digit())
}
