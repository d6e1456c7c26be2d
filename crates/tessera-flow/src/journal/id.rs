//! Journal page identifiers.
//!
//! A page identifier doubles as the storage record id and as an addressable
//! journal path:
//!
//! ```text
//! dataType:{T}_dataId:{D}_page:{N}
//! ```
//!
//! Partial forms address listings: an empty type lists types, an empty id
//! lists ids under a type, and page `0` lists the pages of one entity.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const TYPE_TAG: &str = "dataType:";
const ID_TAG: &str = "_dataId:";
const PAGE_TAG: &str = "_page:";

/// Address of a journal page or listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalId {
    /// Record type; empty lists all types.
    pub data_type: String,
    /// Record identifier; empty lists ids under `data_type`.
    pub data_id: String,
    /// Page index; `0` lists all pages.
    pub page: u32,
}

/// What a [`JournalId`] addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalTarget<'a> {
    /// Every journaled record type.
    Types,
    /// Every journaled id of one type.
    Ids {
        /// Record type.
        data_type: &'a str,
    },
    /// Every page of one entity.
    Pages {
        /// Record type.
        data_type: &'a str,
        /// Record identifier.
        data_id: &'a str,
    },
    /// One page.
    Page {
        /// Record type.
        data_type: &'a str,
        /// Record identifier.
        data_id: &'a str,
        /// Page index, starting at 1.
        page: u32,
    },
}

impl JournalId {
    /// Creates the identifier of one page.
    #[must_use]
    pub fn page(data_type: impl Into<String>, data_id: impl Into<String>, page: u32) -> Self {
        Self {
            data_type: data_type.into(),
            data_id: data_id.into(),
            page,
        }
    }

    /// Classifies the identifier per the listing rules.
    #[must_use]
    pub fn target(&self) -> JournalTarget<'_> {
        match (self.data_type.as_str(), self.data_id.as_str(), self.page) {
            ("", _, _) => JournalTarget::Types,
            (data_type, "", _) => JournalTarget::Ids { data_type },
            (data_type, data_id, 0) => JournalTarget::Pages { data_type, data_id },
            (data_type, data_id, page) => JournalTarget::Page {
                data_type,
                data_id,
                page,
            },
        }
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TYPE_TAG}{}{ID_TAG}{}{PAGE_TAG}{}",
            self.data_type, self.data_id, self.page
        )
    }
}

impl FromStr for JournalId {
    type Err = Error;

    /// Parses an identifier.
    ///
    /// The id is split at the first `_dataId:` and then at the first
    /// `_page:`. Without a `_page:` tag the whole remainder is the data id,
    /// so `dataType:t_dataId:a_1` names id `a_1`.
    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix(TYPE_TAG) else {
            return Err(Error::invalid_journal_id(s, "missing dataType prefix"));
        };

        let Some((data_type, rest)) = rest.split_once(ID_TAG) else {
            if rest.contains(PAGE_TAG) {
                return Err(Error::invalid_journal_id(s, "page tag without dataId tag"));
            }
            return Ok(Self::page(rest, "", 0));
        };

        let Some((data_id, page)) = rest.split_once(PAGE_TAG) else {
            return Ok(Self::page(data_type, rest, 0));
        };

        let page = page
            .parse::<u32>()
            .map_err(|_| Error::invalid_journal_id(s, format!("page [{page}] is not a number")))?;
        Ok(Self::page(data_type, data_id, page))
    }
}
