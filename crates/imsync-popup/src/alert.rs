/// Which label is on screen. Timeouts and close requests only hide the
/// label they were issued for, never a newer one.
#[derive(Debug, Default)]
pub struct AlertState {
    shown: Option<u64>,
}

impl AlertState {
    pub fn show(&mut self, id: u64) {
        self.shown = Some(id);
    }

    /// Returns true when `id` was on screen and should now be hidden.
    pub fn close(&mut self, id: u64) -> bool {
        if self.shown == Some(id) {
            self.shown = None;
            true
        } else {
            false
        }
    }

    pub fn shown(&self) -> Option<u64> {
        self.shown
    }
}
