use crate::domain::Address;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One labelled address from the host's address book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBookEntry {
	pub address: Address,
	pub label: String,
}

impl AddressBookEntry {
	pub fn new(address: impl Into<Address>, label: impl Into<String>) -> Self {
		Self {
			address: address.into(),
			label: label.into(),
		}
	}
}

/// Read-only address to label mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook {
	labels: HashMap<Address, String>,
}

impl AddressBook {
	pub fn from_entries(entries: impl IntoIterator<Item = AddressBookEntry>) -> Self {
		Self {
			labels: entries
				.into_iter()
				.map(|entry| (entry.address, entry.label))
				.collect(),
		}
	}

	pub fn label_for(&self, address: &Address) -> Option<&str> {
		self.labels.get(address).map(String::as_str)
	}

	/// Label for the address, or the raw address when it has none.
	pub fn resolve(&self, address: &Address) -> String {
		self.label_for(address)
			.map(str::to_string)
			.unwrap_or_else(|| address.to_string())
	}

	pub fn len(&self) -> usize {
		self.labels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.labels.is_empty()
	}
}

/// Live view of the persistent address book.
pub trait AddressBookStore: Send + Sync {
	/// Latest snapshot, or `None` while the store has not loaded yet.
	fn snapshot(&self) -> Option<Arc<AddressBook>>;
}

/// Address book held in memory, replaced wholesale on every change.
#[derive(Default)]
pub struct InMemoryAddressBook {
	book: RwLock<Option<Arc<AddressBook>>>,
}

impl InMemoryAddressBook {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn load(&self, entries: impl IntoIterator<Item = AddressBookEntry>) {
		let book = AddressBook::from_entries(entries);
		*self.book.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(book));
	}
}

impl AddressBookStore for InMemoryAddressBook {
	fn snapshot(&self) -> Option<Arc<AddressBook>> {
		self.book.read().unwrap_or_else(PoisonError::into_inner).clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_falls_back_to_raw_address() {
		let book = AddressBook::from_entries([AddressBookEntry::new("1ABC", "Alice")]);
		assert_eq!(book.resolve(&Address::from("1ABC")), "Alice");
		assert_eq!(book.resolve(&Address::from("1XYZ")), "1XYZ");
	}

	#[test]
	fn store_is_empty_until_loaded() {
		let store = InMemoryAddressBook::new();
		assert!(store.snapshot().is_none());

		store.load([AddressBookEntry::new("1ABC", "Alice")]);
		assert_eq!(store.snapshot().map(|book| book.len()), Some(1));
	}
}
