use std::fmt;

/// Target of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Physical,
    /// Process virtual memory rooted at `dtb`. A user-only space refuses
    /// supervisor pages.
    Virtual { dtb: u64, user_only: bool },
}

impl AddressSpace {
    pub fn virtual_space(dtb: u64) -> Self {
        Self::Virtual {
            dtb,
            user_only: false,
        }
    }

    pub fn user_space(dtb: u64) -> Self {
        Self::Virtual {
            dtb,
            user_only: true,
        }
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Physical)
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical => f.write_str("physical"),
            Self::Virtual { dtb, user_only } => {
                write!(f, "virtual(dtb={dtb:#x}")?;
                if *user_only {
                    f.write_str(", user")?;
                }
                f.write_str(")")
            }
        }
    }
}
