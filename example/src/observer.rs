use std::cell::{Cell, RefCell};

use sharedptr::{DanglingWeakError, SelfRef, Shared, SharedFromThis, Weak};

trait Listener {
    fn notify(&self, event: &str);
}

#[derive(Default)]
struct EventBus {
    listeners: RefCell<Vec<Weak<dyn Listener>>>,
}

impl EventBus {
    fn subscribe(&self, listener: Weak<dyn Listener>) {
        self.listeners.borrow_mut().push(listener);
    }

    /// notifies live listeners and forgets expired ones. returns the number notified.
    fn publish(&self, event: &str) -> usize {
        let live: Vec<_> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|l| !l.expired());
            listeners.iter().map(Weak::lock).collect()
        };

        for listener in &live {
            listener.notify(event);
        }
        live.len()
    }
}

struct Counter {
    this: SelfRef<Counter>,
    name: &'static str,
    received: Cell<usize>,
}

impl SharedFromThis for Counter {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

impl Counter {
    fn new(name: &'static str) -> Self {
        Self {
            this: SelfRef::new(),
            name,
            received: Cell::new(0),
        }
    }

    /// registers itself without the caller having to pass its handle along.
    fn attach(&self, bus: &EventBus) -> Result<(), DanglingWeakError> {
        let this = self.shared_from_this()?;
        let listener: Shared<dyn Listener> = Shared::alias(&this, |c| c as &dyn Listener);
        bus.subscribe(Shared::downgrade(&listener));
        Ok(())
    }
}

impl Listener for Counter {
    fn notify(&self, event: &str) {
        self.received.set(self.received.get() + 1);
        log::info!("{} received {}", self.name, event);
    }
}

#[cfg_attr(test, test)]
pub fn main() {
    println!("----- observer example -----\n");

    let bus = EventBus::default();
    let first = Shared::new_enabled(Counter::new("first"));
    let second = Shared::from_box_enabled(Box::new(Counter::new("second")));

    for counter in [&first, &second] {
        if let Err(e) = counter.attach(&bus) {
            log::warn!("{} could not attach: {}", counter.name, e);
        }
    }

    // never wrapped, so it cannot hand out a handle to itself.
    let unwrapped = Counter::new("unwrapped");
    match unwrapped.attach(&bus) {
        Ok(()) => unreachable!(),
        Err(e) => println!("{}: {}", unwrapped.name, e),
    }

    println!("notified: {}", bus.publish("start"));
    drop(second);
    println!("notified: {}", bus.publish("stop"));

    assert_eq!(first.received.get(), 2);
    assert_eq!(bus.listeners.borrow().len(), 1);

    println!();
}
