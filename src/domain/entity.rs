use chrono::{DateTime, Utc};

/// Aggregate root. Owns its addresses, name variants and life-event dates;
/// the three collections are persisted and removed together with the entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entity {
    pub id: String,
    pub gender: Option<String>,
    pub deceased: bool,
    pub addresses: Vec<Address>,
    pub names: Vec<Name>,
    pub dates: Vec<DateRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Assigned by the store on insert. Incoming values are ignored.
    pub id: Option<i64>,
    pub entity_id: String,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Name {
    pub entity_id: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub surname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DateRecord {
    pub entity_id: String,
    pub date_type: String,
    pub date: Option<DateTime<Utc>>,
}

/// Which child collections an update replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphChanges {
    pub addresses: bool,
    pub names: bool,
    pub dates: bool,
}

impl Entity {
    /// Points every child record at this entity.
    pub fn adopt_children(&mut self) {
        for address in &mut self.addresses {
            address.entity_id.clone_from(&self.id);
        }
        for name in &mut self.names {
            name.entity_id.clone_from(&self.id);
        }
        for date in &mut self.dates {
            date.entity_id.clone_from(&self.id);
        }
    }

    /// Applies an incoming version of this aggregate onto the stored one.
    ///
    /// `deceased` always takes the incoming value. `gender` only changes when
    /// the incoming value has non-whitespace content. A non-empty incoming
    /// collection replaces the stored collection as a whole; an empty one
    /// leaves it untouched.
    pub fn reconcile(&mut self, incoming: Entity) -> GraphChanges {
        self.deceased = incoming.deceased;

        if let Some(gender) = incoming.gender
            && !gender.trim().is_empty()
        {
            self.gender = Some(gender);
        }

        let mut changes = GraphChanges::default();

        if !incoming.addresses.is_empty() {
            self.addresses = incoming.addresses;
            changes.addresses = true;
        }
        if !incoming.names.is_empty() {
            self.names = incoming.names;
            changes.names = true;
        }
        if !incoming.dates.is_empty() {
            self.dates = incoming.dates;
            changes.dates = true;
        }

        self.adopt_children();
        changes
    }

    pub fn first_name_record(&self) -> Option<&Name> {
        self.names.first()
    }

    pub fn first_date_record(&self) -> Option<&DateRecord> {
        self.dates.first()
    }
}

impl GraphChanges {
    pub fn any(&self) -> bool {
        self.addresses || self.names || self.dates
    }
}
