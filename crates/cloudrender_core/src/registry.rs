use crate::Job;

/// Jobs in fetch order plus the selection cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    selected: Option<String>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Inserts `job`, replacing an existing record with the same identifier in
    /// place so repeated fetches never duplicate entries.
    pub fn append(&mut self, job: Job) -> &Job {
        let index = match self.jobs.iter().position(|known| known.id() == job.id()) {
            Some(index) => {
                self.jobs[index] = job;
                index
            }
            None => {
                self.jobs.push(job);
                self.jobs.len() - 1
            }
        };
        &self.jobs[index]
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id() == id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&Job> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// Moves the cursor to `id`. Unknown identifiers leave it untouched.
    pub fn select(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.selected = Some(id.to_string());
        true
    }

    /// Applies one successful list fetch.
    ///
    /// The last fetched job becomes selected only when the registry was empty
    /// beforehand; otherwise the previous selection survives.
    pub fn absorb_fetch(&mut self, fetched: Vec<Job>) {
        let was_empty = self.jobs.is_empty();
        let mut last_id = None;
        for job in fetched {
            last_id = Some(self.append(job).id().to_string());
        }
        if was_empty {
            if let Some(id) = last_id {
                self.selected = Some(id);
            }
        }
    }
}
