use std::cell::RefCell;

use sharedptr::{SelfRef, Shared, SharedFromThis, Weak};

/// tree node that owns its children and only observes its parent.
struct Node {
    this: SelfRef<Node>,
    name: String,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<Shared<Node>>>,
}

impl SharedFromThis for Node {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

impl Node {
    fn new(name: &str) -> Shared<Self> {
        Shared::new_enabled(Node {
            this: SelfRef::new(),
            name: name.to_owned(),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        })
    }

    fn add_child(&self, child: Shared<Node>) {
        *child.parent.borrow_mut() = self.weak_from_this();
        self.children.borrow_mut().push(child);
    }

    fn path(&self) -> String {
        match self.parent.borrow().lock().get() {
            Some(parent) => format!("{}/{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        log::debug!("dropping node {}", self.name);
    }
}

#[cfg_attr(test, test)]
pub fn main() {
    println!("----- tree example -----\n");

    let root = Node::new("root");
    let usr = Node::new("usr");
    let bin = Node::new("bin");

    usr.add_child(bin.clone());
    root.add_child(usr.clone());

    println!("path: {}", bin.path());
    println!("root: use_count={} weak_count={}", root.use_count(), root.weak_count());
    println!("usr: use_count={} weak_count={}", usr.use_count(), usr.weak_count());
    assert_eq!(bin.path(), "root/usr/bin");

    let observer = Shared::downgrade(&root);
    drop(root);

    println!("root expired: {}", observer.expired());
    println!("path after root dropped: {}", bin.path());
    assert!(observer.expired());
    assert_eq!(bin.path(), "usr/bin");

    drop(usr);
    assert_eq!(bin.path(), "bin");
    assert_eq!(bin.use_count(), 1);

    println!();
}
