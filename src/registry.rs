//! Owning arena for every page and server created during a run.
//!
//! Entries are only ever appended. Ids are never reused, so a handle held by a
//! script after the registry is cleared simply stops resolving.

use std::rc::Rc;

use crate::page::{Page, PageId};
use crate::server::{ServerId, WebServer};

#[derive(Debug, Default)]
pub struct Registry {
    pages: Vec<Rc<Page>>,
    servers: Vec<Rc<WebServer>>,
    next_page: u32,
    next_server: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_page_id(&mut self) -> PageId {
        self.next_page += 1;
        PageId(self.next_page)
    }

    pub fn next_server_id(&mut self) -> ServerId {
        self.next_server += 1;
        ServerId(self.next_server)
    }

    pub fn add_page(&mut self, page: Rc<Page>) {
        self.pages.push(page);
    }

    pub fn add_server(&mut self, server: Rc<WebServer>) {
        self.servers.push(server);
    }

    pub fn page(&self, id: PageId) -> Option<Rc<Page>> {
        self.pages.iter().find(|page| page.id() == id).cloned()
    }

    pub fn server(&self, id: ServerId) -> Option<Rc<WebServer>> {
        self.servers.iter().find(|server| server.id() == id).cloned()
    }

    /// Pages in creation order.
    pub fn pages(&self) -> &[Rc<Page>] {
        &self.pages
    }

    pub fn servers(&self) -> &[Rc<WebServer>] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.servers.is_empty()
    }

    /// Empty the registry. Servers are closed; pages are handed back newest
    /// first so the caller can release them in a safe order.
    pub fn drain(&mut self) -> Vec<Rc<Page>> {
        for server in self.servers.drain(..).rev() {
            server.close();
        }
        let mut pages = std::mem::take(&mut self.pages);
        pages.reverse();
        pages
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Engine instances must go in reverse creation order.
        for page in self.drain() {
            drop(page);
        }
    }
}
