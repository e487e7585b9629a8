#![forbid(unsafe_code)]

//! The host interface: how the reconciler touches the real tree.
//!
//! Render-phase operations (`create_*`, `append_initial_child`,
//! `prepare_update`) only build detached nodes. Everything that changes the
//! attached tree happens in the commit phase, all at once.

use std::fmt;

use crate::element::Props;
use crate::error::HostResult;

/// Host tree operations.
pub trait HostConfig: 'static {
    /// A node handle. Cloning must not copy the node.
    type Instance: Clone + fmt::Debug + 'static;
    /// Where a root mounts.
    type Container: Clone + fmt::Debug + 'static;
    /// Diff computed during render and applied in commit.
    type UpdatePayload: fmt::Debug + 'static;

    // Render phase.

    fn create_instance(&mut self, kind: &str, props: &Props) -> HostResult<Self::Instance>;

    fn create_text_instance(&mut self, text: &str) -> HostResult<Self::Instance>;

    /// Attach a child to a node that is not in the tree yet.
    fn append_initial_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> HostResult<()>;

    /// Called once a new node has all its children.
    fn finalize_initial_children(
        &mut self,
        _instance: &Self::Instance,
        _kind: &str,
        _props: &Props,
    ) -> HostResult<()> {
        Ok(())
    }

    /// Diff old and new props; `None` means nothing to commit.
    fn prepare_update(
        &self,
        instance: &Self::Instance,
        kind: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<Self::UpdatePayload>;

    /// True when the node renders its text itself, so children are not
    /// reconciled.
    fn should_set_text_content(&self, _kind: &str, _props: &Props) -> bool {
        false
    }

    // Commit phase.

    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance) -> HostResult<()>;

    fn append_child_to_container(
        &mut self,
        container: &Self::Container,
        child: &Self::Instance,
    ) -> HostResult<()>;

    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    ) -> HostResult<()>;

    fn insert_in_container_before(
        &mut self,
        container: &Self::Container,
        child: &Self::Instance,
        before: &Self::Instance,
    ) -> HostResult<()>;

    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance) -> HostResult<()>;

    fn remove_child_from_container(
        &mut self,
        container: &Self::Container,
        child: &Self::Instance,
    ) -> HostResult<()>;

    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        payload: Self::UpdatePayload,
        kind: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> HostResult<()>;

    fn commit_text_update(
        &mut self,
        instance: &Self::Instance,
        old_text: &str,
        new_text: &str,
    ) -> HostResult<()>;

    fn reset_text_content(&mut self, _instance: &Self::Instance) -> HostResult<()> {
        Ok(())
    }

    fn hide_instance(&mut self, instance: &Self::Instance) -> HostResult<()>;

    fn unhide_instance(&mut self, instance: &Self::Instance, props: &Props) -> HostResult<()>;

    fn hide_text_instance(&mut self, instance: &Self::Instance) -> HostResult<()> {
        self.hide_instance(instance)
    }

    fn unhide_text_instance(&mut self, instance: &Self::Instance, _text: &str) -> HostResult<()> {
        self.unhide_instance(instance, &Props::empty())
    }

    /// Empty a container before its first commit.
    fn clear_container(&mut self, _container: &Self::Container) -> HostResult<()> {
        Ok(())
    }

    /// Bracket the mutation pass.
    fn prepare_for_commit(&mut self, _container: &Self::Container) {}

    fn reset_after_commit(&mut self, _container: &Self::Container) {}

    /// A removed node's fiber is gone; release anything tied to it.
    fn detach_deleted_instance(&mut self, _instance: &Self::Instance) {}
}
