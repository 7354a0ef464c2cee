use crate::error::FanOutError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A named blob stored on the node alongside the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub name: String,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// One unit of work: a binary, its payloads, and an optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub binary: Arc<[u8]>,
    pub payloads: Vec<Payload>,
    pub argument: Option<String>,
}

impl Task {
    pub fn new(binary: Arc<[u8]>, payload: Option<Payload>, argument: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            binary,
            payloads: payload.into_iter().collect(),
            argument,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Task {} with {} payloads and argument: {:?}>",
            &self.id.to_string()[..8],
            self.payloads.len(),
            self.argument
        )
    }
}

/// Builds the task list for one invocation.
///
/// Pairs payloads with arguments when both are given in equal number,
/// otherwise fans out over whichever list is non-empty. Mismatched non-empty
/// lists produce no tasks at all. With neither, a single bare task is built.
pub fn fan_out(
    binary: impl Into<Arc<[u8]>>,
    payloads: Vec<Payload>,
    arguments: Vec<String>,
) -> Result<Vec<Task>, FanOutError> {
    let binary = binary.into();

    let tasks = match (payloads.is_empty(), arguments.is_empty()) {
        (false, false) if payloads.len() == arguments.len() => payloads
            .into_iter()
            .zip(arguments)
            .map(|(payload, argument)| Task::new(binary.clone(), Some(payload), Some(argument)))
            .collect(),
        (false, true) => payloads
            .into_iter()
            .map(|payload| Task::new(binary.clone(), Some(payload), None))
            .collect(),
        (true, false) => arguments
            .into_iter()
            .map(|argument| Task::new(binary.clone(), None, Some(argument)))
            .collect(),
        (false, false) => {
            return Err(FanOutError::Mismatched {
                payloads: payloads.len(),
                arguments: arguments.len(),
            })
        }
        (true, true) => vec![Task::new(binary, None, None)],
    };

    Ok(tasks)
}

/// FIFO of pending tasks. Failed submissions go back to the front.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn requeue(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

impl FromIterator<Task> for TaskQueue {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self {
            tasks: iter.into_iter().collect(),
        }
    }
}
