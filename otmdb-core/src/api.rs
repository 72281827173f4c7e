//! `Otmdb`: the operation surface
//!
//! One method per catalogue operation. Services already log committed
//! mutations; this layer logs failures. Domain outcomes go to `debug!` with
//! their code, internal failures to `error!` with the full error chain, and
//! callers only ever see [`INTERNAL_SERVER_ERROR`] for the latter.

use crate::error::{OperationError, QueryError, INTERNAL_SERVER_ERROR};
use crate::event_log::{TagEventType, TypedEvent, VideoTagEventType};
use crate::models::{
    RegistrationChecking, RegistrationRequest, RequestSemitagging, RequestTagging, Semitag, Tag,
    TagParent, TagType, UserId, Video, VideoDetail, VideoSourceKind, VideoTag,
};
use crate::registration::{
    self, AcceptError, AcceptedRegistration, Bilibili, NewRegistrationRequest, Nicovideo,
    RegistrationWorkflow, RejectError, RejectedRegistration, Soundcloud, SubmitError, Youtube,
};
use crate::semitag::{
    RejectSemitagError, ResolveSemitagError, SemitagRejection, SemitagResolution, SemitagService,
    SuggestSemitagError,
};
use crate::store::Store;
use crate::tag_graph::{CreateTagError, CreatedTag, ExplicitizeError, NewTag, TagGraphStore};
use crate::tagging::{AttachError, DetachError, TaggingService};
use crate::timeline::{TimelineCursor, TimelineEntry, TimelinePage, TimelineProjector, TimelineWindow};
use crate::videos::VideoCatalog;
use futures::stream::Stream;
use otmdb_common::pagination::{Connection, ConnectionArgs, SortOrder};
use otmdb_common::EventRecord;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

/// Log a failed operation at the level its kind calls for
fn report<T, E: OperationError>(operation: &'static str, result: Result<T, E>) -> Result<T, E> {
    if let Err(e) = &result {
        if e.is_internal() {
            error!(operation = operation, code = INTERNAL_SERVER_ERROR, error = ?e, "Operation failed");
        } else {
            debug!(operation = operation, code = e.code(), error = %e, "Operation rejected");
        }
    }
    result
}

/// Run the same expression against the workflow of `source`
macro_rules! with_workflow {
    ($self:ident, $source:expr, |$wf:ident| $body:expr) => {
        match $source {
            VideoSourceKind::Nicovideo => {
                let $wf = &$self.nicovideo;
                $body
            }
            VideoSourceKind::Youtube => {
                let $wf = &$self.youtube;
                $body
            }
            VideoSourceKind::Soundcloud => {
                let $wf = &$self.soundcloud;
                $body
            }
            VideoSourceKind::Bilibili => {
                let $wf = &$self.bilibili;
                $body
            }
        }
    };
}

/// A registration request with its intents and disposition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationDetail {
    pub request: RegistrationRequest,
    pub taggings: Vec<RequestTagging>,
    pub semitaggings: Vec<RequestSemitagging>,
    pub checking: Option<RegistrationChecking>,
}

/// The catalogue
#[derive(Clone)]
pub struct Otmdb {
    store: Store,
    tags: TagGraphStore,
    tagging: TaggingService,
    semitags: SemitagService,
    videos: VideoCatalog,
    timeline: TimelineProjector,
    nicovideo: RegistrationWorkflow<Nicovideo>,
    youtube: RegistrationWorkflow<Youtube>,
    soundcloud: RegistrationWorkflow<Soundcloud>,
    bilibili: RegistrationWorkflow<Bilibili>,
}

impl Otmdb {
    pub fn new(store: Store) -> Self {
        Self {
            tags: TagGraphStore::new(store.clone()),
            tagging: TaggingService::new(store.clone()),
            semitags: SemitagService::new(store.clone()),
            videos: VideoCatalog::new(store.clone()),
            timeline: TimelineProjector::new(store.clone()),
            nicovideo: RegistrationWorkflow::new(store.clone(), Nicovideo),
            youtube: RegistrationWorkflow::new(store.clone(), Youtube),
            soundcloud: RegistrationWorkflow::new(store.clone(), Soundcloud),
            bilibili: RegistrationWorkflow::new(store.clone(), Bilibili),
            store,
        }
    }

    /// Wrap a pool prepared by `init_database`
    pub async fn open(pool: SqlitePool) -> otmdb_common::Result<Self> {
        Ok(Self::new(Store::open(pool).await?))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Committed event records from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.store.bus().subscribe()
    }

    pub fn tags(&self) -> &TagGraphStore {
        &self.tags
    }

    pub fn tagging(&self) -> &TaggingService {
        &self.tagging
    }

    pub fn semitags(&self) -> &SemitagService {
        &self.semitags
    }

    pub fn videos(&self) -> &VideoCatalog {
        &self.videos
    }

    pub fn nicovideo(&self) -> &RegistrationWorkflow<Nicovideo> {
        &self.nicovideo
    }

    pub fn youtube(&self) -> &RegistrationWorkflow<Youtube> {
        &self.youtube
    }

    pub fn soundcloud(&self) -> &RegistrationWorkflow<Soundcloud> {
        &self.soundcloud
    }

    pub fn bilibili(&self) -> &RegistrationWorkflow<Bilibili> {
        &self.bilibili
    }

    // ========================================
    // Tags
    // ========================================

    pub async fn register_tag(&self, new: NewTag, actor: &UserId) -> Result<CreatedTag, CreateTagError> {
        report("register_tag", self.tags.create_tag(new, actor).await)
    }

    pub async fn explicitize_tag_parent(
        &self,
        edge_id: Uuid,
        actor: &UserId,
    ) -> Result<TagParent, ExplicitizeError> {
        report("explicitize_tag_parent", self.tags.explicitize(edge_id, actor).await)
    }

    pub async fn get_tag(&self, tag_id: Uuid) -> Result<Option<Tag>, QueryError> {
        report("get_tag", self.tags.get_tag(tag_id).await.map_err(QueryError::from))
    }

    pub async fn find_tags(&self, order: SortOrder, args: &ConnectionArgs) -> Result<Connection<Tag>, QueryError> {
        report("find_tags", self.tags.find_tags(order, args).await)
    }

    pub async fn tag_type(&self, tag_id: Uuid) -> Result<TagType, QueryError> {
        report("tag_type", self.tags.resolve_category_type(tag_id).await)
    }

    pub async fn tag_events(
        &self,
        tag_id: Uuid,
        limit: Option<u32>,
        skip: u32,
    ) -> Result<Vec<TypedEvent<TagEventType>>, QueryError> {
        report(
            "tag_events",
            self.tags.tag_events(tag_id, limit, skip).await.map_err(QueryError::from),
        )
    }

    // ========================================
    // Tagging
    // ========================================

    pub async fn add_tag_to_video(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
        actor: &UserId,
    ) -> Result<VideoTag, AttachError> {
        report("add_tag_to_video", self.tagging.attach(video_id, tag_id, actor).await)
    }

    pub async fn remove_tag_from_video(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
        actor: &UserId,
    ) -> Result<VideoTag, DetachError> {
        report("remove_tag_from_video", self.tagging.detach(video_id, tag_id, actor).await)
    }

    pub async fn video_tag_history(
        &self,
        video_id: Uuid,
        tag_id: Uuid,
    ) -> Result<Vec<TypedEvent<VideoTagEventType>>, QueryError> {
        report(
            "video_tag_history",
            self.tagging.history(video_id, tag_id).await.map_err(QueryError::from),
        )
    }

    // ========================================
    // Semitags
    // ========================================

    pub async fn add_semitag_to_video(
        &self,
        video_id: Uuid,
        name: &str,
        actor: &UserId,
    ) -> Result<Semitag, SuggestSemitagError> {
        report("add_semitag_to_video", self.semitags.suggest(video_id, name, actor).await)
    }

    pub async fn resolve_semitag(
        &self,
        semitag_id: Uuid,
        tag_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<SemitagResolution, ResolveSemitagError> {
        report(
            "resolve_semitag",
            self.semitags.resolve(semitag_id, tag_id, note, actor).await,
        )
    }

    pub async fn reject_semitag(
        &self,
        semitag_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<SemitagRejection, RejectSemitagError> {
        report("reject_semitag", self.semitags.reject(semitag_id, note, actor).await)
    }

    // ========================================
    // Registration
    // ========================================

    pub async fn request_registration(
        &self,
        source: VideoSourceKind,
        new: NewRegistrationRequest,
        actor: &UserId,
    ) -> Result<RegistrationRequest, SubmitError> {
        let result = with_workflow!(self, source, |wf| wf.submit(new, actor).await);
        report("request_registration", result)
    }

    pub async fn accept_registration(
        &self,
        source: VideoSourceKind,
        request_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<AcceptedRegistration, AcceptError> {
        let result = with_workflow!(self, source, |wf| wf.accept(request_id, note, actor).await);
        report("accept_registration", result)
    }

    pub async fn reject_registration(
        &self,
        source: VideoSourceKind,
        request_id: Uuid,
        note: Option<&str>,
        actor: &UserId,
    ) -> Result<RejectedRegistration, RejectError> {
        let result = with_workflow!(self, source, |wf| wf.reject(request_id, note, actor).await);
        report("reject_registration", result)
    }

    /// Request of any source with its intents and disposition
    pub async fn get_registration_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RegistrationDetail>, QueryError> {
        let result = self.load_registration_detail(request_id).await;
        report("get_registration_request", result)
    }

    async fn load_registration_detail(
        &self,
        request_id: Uuid,
    ) -> Result<Option<RegistrationDetail>, QueryError> {
        let mut conn = self.store.reader().await?;
        let Some(request) = registration::find_request(&mut conn, request_id).await? else {
            return Ok(None);
        };
        let taggings = registration::find_taggings(&mut conn, request_id).await?;
        let semitaggings = registration::find_semitaggings(&mut conn, request_id).await?;
        let checking = registration::find_checking(&mut conn, request_id).await?;
        Ok(Some(RegistrationDetail {
            request,
            taggings,
            semitaggings,
            checking,
        }))
    }

    pub async fn find_registration_requests(
        &self,
        source: VideoSourceKind,
        checked: Option<bool>,
        order: SortOrder,
        args: &ConnectionArgs,
    ) -> Result<Connection<RegistrationRequest>, QueryError> {
        let result = with_workflow!(self, source, |wf| wf.find(checked, order, args).await);
        report("find_registration_requests", result)
    }

    // ========================================
    // Videos and timeline
    // ========================================

    pub async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoDetail>, QueryError> {
        report("get_video", self.videos.get_video(video_id).await.map_err(QueryError::from))
    }

    pub async fn find_videos(&self, order: SortOrder, args: &ConnectionArgs) -> Result<Connection<Video>, QueryError> {
        report("find_videos", self.videos.find_videos(order, args).await)
    }

    pub async fn timeline(
        &self,
        window: TimelineWindow,
        after: Option<&str>,
        limit: u32,
    ) -> Result<TimelinePage, QueryError> {
        report("timeline", self.timeline.page(window, after, limit).await)
    }

    /// Whole window as a lazy stream; see [`TimelineProjector::stream`]
    pub fn timeline_stream(
        &self,
        window: TimelineWindow,
        after: Option<TimelineCursor>,
    ) -> impl Stream<Item = otmdb_common::Result<TimelineEntry>> + Send + 'static {
        self.timeline.stream(window, after)
    }
}
