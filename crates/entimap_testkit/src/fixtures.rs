//! Sample entity types and session helpers.
//!
//! The types cover every mapping option the engine supports:
//!
//! | type      | collection  | tracking          | versioned | priority |
//! |-----------|-------------|-------------------|-----------|----------|
//! | `Person`  | `people`    | session default   | no        | medium   |
//! | `Company` | `companies` | session default   | yes       | high     |
//! | `Pet`     | `pets`      | session default   | no        | low      |
//! | `Book`    | `books`     | observe           | no        | medium   |
//! | `Ledger`  | `ledgers`   | deferred explicit | no        | medium   |

use entimap_codec::Value;
use entimap_core::types::{ChangeTracking, Priority};
use entimap_core::{
    Config, CoreError, CoreResult, DocumentStore, Entity, EntityMapping, Handle, Identifier,
    MemoryStore, PropertyFlags, Reference, Session, SessionFactory, Walk, Walker,
};
use std::sync::Arc;

fn text(doc: &Value, key: &str) -> CoreResult<String> {
    doc.get(key)
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| CoreError::mapping(format!("missing text field {key:?}")))
}

fn integer(doc: &Value, key: &str) -> CoreResult<i64> {
    doc.get(key)
        .and_then(Value::as_integer)
        .ok_or_else(|| CoreError::mapping(format!("missing integer field {key:?}")))
}

fn optional_reference<T: Entity>(doc: &Value, key: &str) -> CoreResult<Option<Reference<T>>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Reference::from_value(value).map(Some),
    }
}

fn reference_value<T: Entity>(reference: &Option<Reference<T>>) -> CoreResult<Value> {
    match reference {
        Some(reference) => reference.to_value(),
        None => Ok(Value::Null),
    }
}

fn references<T: Entity>(doc: &Value, key: &str) -> CoreResult<Vec<Reference<T>>> {
    doc.get(key)
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .map(Reference::from_value)
        .collect()
}

/// A person. Owns pets and may work for a company.
#[derive(Debug)]
pub struct Person {
    /// Session-assigned identifier.
    pub id: Option<Identifier>,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: i64,
    /// Embedded home address.
    pub address: Address,
    /// Employer, saved along with the person.
    pub employer: Option<Reference<Company>>,
    /// Pets, cascaded for every operation.
    pub pets: Vec<Reference<Pet>>,
}

impl Entity for Person {
    const MAPPING: EntityMapping = EntityMapping::new("people");

    fn identifier(&self) -> Option<Identifier> {
        self.id
    }

    fn set_identifier(&mut self, id: Option<Identifier>) {
        self.id = id;
    }

    fn to_document(&self) -> CoreResult<Value> {
        let pets = self
            .pets
            .iter()
            .map(Reference::to_value)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Value::document()
            .with("name", self.name.as_str())
            .with("age", self.age)
            .with("address", self.address.to_value()?)
            .with("employer", reference_value(&self.employer)?)
            .with("pets", pets))
    }

    fn from_document(doc: &Value) -> CoreResult<Self> {
        let address = doc
            .get("address")
            .ok_or_else(|| CoreError::mapping("missing address"))?;
        Ok(Person {
            id: None,
            name: text(doc, "name")?,
            age: integer(doc, "age")?,
            address: Address::from_value(address)?,
            employer: optional_reference(doc, "employer")?,
            pets: references(doc, "pets")?,
        })
    }

    fn walk(&self, walker: &mut Walker<'_>) {
        walker.embedded(&self.address);
        if let Some(employer) = &self.employer {
            walker.reference(PropertyFlags::SAVE, employer);
        }
        walker.references(PropertyFlags::ALL, &self.pets);
    }
}

/// An address embedded in a [`Person`] document.
#[derive(Debug, Clone, Default)]
pub struct Address {
    /// City name.
    pub city: String,
    /// Company owning the building, saved along with the tenant.
    pub landlord: Option<Reference<Company>>,
}

impl Address {
    fn to_value(&self) -> CoreResult<Value> {
        Ok(Value::document()
            .with("city", self.city.as_str())
            .with("landlord", reference_value(&self.landlord)?))
    }

    fn from_value(value: &Value) -> CoreResult<Self> {
        Ok(Address {
            city: text(value, "city")?,
            landlord: optional_reference(value, "landlord")?,
        })
    }
}

impl Walk for Address {
    fn walk(&self, walker: &mut Walker<'_>) {
        if let Some(landlord) = &self.landlord {
            walker.reference(PropertyFlags::SAVE, landlord);
        }
    }
}

/// A company. Versioned and flushed before everything else.
#[derive(Debug)]
pub struct Company {
    /// Session-assigned identifier.
    pub id: Option<Identifier>,
    /// Registered name.
    pub name: String,
}

impl Entity for Company {
    const MAPPING: EntityMapping = EntityMapping::new("companies")
        .versioned()
        .priority(Priority::HIGH);

    fn identifier(&self) -> Option<Identifier> {
        self.id
    }

    fn set_identifier(&mut self, id: Option<Identifier>) {
        self.id = id;
    }

    fn to_document(&self) -> CoreResult<Value> {
        Ok(Value::document().with("name", self.name.as_str()))
    }

    fn from_document(doc: &Value) -> CoreResult<Self> {
        Ok(Company {
            id: None,
            name: text(doc, "name")?,
        })
    }
}

/// A pet. Flushed after everything else.
#[derive(Debug)]
pub struct Pet {
    /// Session-assigned identifier.
    pub id: Option<Identifier>,
    /// Name.
    pub name: String,
}

impl Entity for Pet {
    const MAPPING: EntityMapping = EntityMapping::new("pets").priority(Priority::LOW);

    fn identifier(&self) -> Option<Identifier> {
        self.id
    }

    fn set_identifier(&mut self, id: Option<Identifier>) {
        self.id = id;
    }

    fn to_document(&self) -> CoreResult<Value> {
        Ok(Value::document().with("name", self.name.as_str()))
    }

    fn from_document(doc: &Value) -> CoreResult<Self> {
        Ok(Pet {
            id: None,
            name: text(doc, "name")?,
        })
    }
}

/// A book whose mutations are observed.
#[derive(Debug)]
pub struct Book {
    /// Session-assigned identifier.
    pub id: Option<Identifier>,
    /// Title.
    pub title: String,
    /// Page count.
    pub pages: i64,
    /// Author, refreshed and detached along with the book.
    pub author: Option<Reference<Person>>,
}

impl Entity for Book {
    const MAPPING: EntityMapping =
        EntityMapping::new("books").change_tracking(ChangeTracking::Observe);

    fn identifier(&self) -> Option<Identifier> {
        self.id
    }

    fn set_identifier(&mut self, id: Option<Identifier>) {
        self.id = id;
    }

    fn to_document(&self) -> CoreResult<Value> {
        Ok(Value::document()
            .with("title", self.title.as_str())
            .with("pages", self.pages)
            .with("author", reference_value(&self.author)?))
    }

    fn from_document(doc: &Value) -> CoreResult<Self> {
        Ok(Book {
            id: None,
            title: text(doc, "title")?,
            pages: integer(doc, "pages")?,
            author: optional_reference(doc, "author")?,
        })
    }

    fn walk(&self, walker: &mut Walker<'_>) {
        if let Some(author) = &self.author {
            walker.reference(PropertyFlags::DETACH | PropertyFlags::REFRESH, author);
        }
    }
}

/// A ledger that is only written when saved again.
#[derive(Debug)]
pub struct Ledger {
    /// Session-assigned identifier.
    pub id: Option<Identifier>,
    /// Balance in cents.
    pub balance: i64,
}

impl Entity for Ledger {
    const MAPPING: EntityMapping =
        EntityMapping::new("ledgers").change_tracking(ChangeTracking::DeferredExplicit);

    fn identifier(&self) -> Option<Identifier> {
        self.id
    }

    fn set_identifier(&mut self, id: Option<Identifier>) {
        self.id = id;
    }

    fn to_document(&self) -> CoreResult<Value> {
        Ok(Value::document().with("balance", self.balance))
    }

    fn from_document(doc: &Value) -> CoreResult<Self> {
        Ok(Ledger {
            id: None,
            balance: integer(doc, "balance")?,
        })
    }
}

/// Creates a new person living in Paris.
pub fn person(name: &str) -> Handle<Person> {
    Handle::new(Person {
        id: None,
        name: name.to_string(),
        age: 30,
        address: Address {
            city: "Paris".to_string(),
            landlord: None,
        },
        employer: None,
        pets: Vec::new(),
    })
}

/// Creates a new company.
pub fn company(name: &str) -> Handle<Company> {
    Handle::new(Company {
        id: None,
        name: name.to_string(),
    })
}

/// Creates a new pet.
pub fn pet(name: &str) -> Handle<Pet> {
    Handle::new(Pet {
        id: None,
        name: name.to_string(),
    })
}

/// Creates a new book.
pub fn book(title: &str) -> Handle<Book> {
    Handle::new(Book {
        id: None,
        title: title.to_string(),
        pages: 100,
        author: None,
    })
}

/// Creates a new ledger.
pub fn ledger(balance: i64) -> Handle<Ledger> {
    Handle::new(Ledger { id: None, balance })
}

/// Returns a factory over `store` with every fixture type registered.
pub fn factory(store: Arc<dyn DocumentStore>, config: Config) -> SessionFactory {
    let mut factory = SessionFactory::with_config(store, config);
    factory
        .register::<Person>()
        .register::<Company>()
        .register::<Pet>()
        .register::<Book>()
        .register::<Ledger>();
    factory
}

/// Creates a session over a fresh [`MemoryStore`].
pub fn memory_session() -> (Session, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let session = factory(store.clone(), Config::default()).create_session();
    (session, store)
}
