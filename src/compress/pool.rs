use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// A small free list of reusable objects.
///
/// Objects are handed out wrapped in [`Pooled`] and go back to the list when
/// the guard drops, unless the list is already holding `max_idle` of them.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T> Pool<T> {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    /// Takes an idle object or builds a fresh one with `make`.
    pub fn take(&self, make: impl FnOnce() -> T) -> Pooled<'_, T> {
        let item = self.idle.lock().pop().unwrap_or_else(make);
        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    pub fn try_take<E>(&self, make: impl FnOnce() -> Result<T, E>) -> Result<Pooled<'_, T>, E> {
        let item = match self.idle.lock().pop() {
            Some(item) => item,
            None => make()?,
        };
        Ok(Pooled {
            pool: self,
            item: Some(item),
        })
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn give_back(&self, item: T) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Drops the object instead of returning it, e.g. after an error left it
    /// in an unknown state.
    pub fn discard(mut self) {
        self.item = None;
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item taken")
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item taken")
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_reused() {
        let pool: Pool<Vec<u8>> = Pool::new(2);
        {
            let mut buf = pool.take(Vec::new);
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.take(Vec::new);
        assert_eq!(&buf[..], b"hello");
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool: Pool<u32> = Pool::new(1);
        let a = pool.take(|| 1);
        let b = pool.take(|| 2);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn discarded_objects_do_not_return() {
        let pool: Pool<u32> = Pool::new(4);
        pool.take(|| 7).discard();
        assert_eq!(pool.idle(), 0);
    }
}
